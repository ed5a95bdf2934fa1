//! Prometheus metrics helpers for squadwatch.
//!
//! # Usage
//!
//! ```rust,ignore
//! use squadwatch_core::metrics::{init_metrics, start_metrics_server};
//!
//! let handle = init_metrics();
//! start_metrics_server(9090, handle).await?;
//!
//! metrics::counter!("discovery_probes_total").increment(1);
//! ```
//!
//! # Metric Naming Conventions
//!
//! - Prefix: component (`sync_`, `discovery_`, `refresh_`, `upstream_`, `notifications_`)
//! - Suffix: unit or type (`_total`, `_seconds`)
//! - Labels: low-cardinality only (endpoint, outcome); never squadron ids

use axum::{Router, routing::get};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

/// Initialize the Prometheus metrics recorder.
///
/// Must be called once at startup before any metrics are recorded.
///
/// # Panics
///
/// Panics if called more than once (the recorder can only be installed once).
pub fn init_metrics() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder");

    register_metrics();

    handle
}

/// Like [`init_metrics`] but returns `None` if a recorder is already installed.
pub fn try_init_metrics() -> Option<PrometheusHandle> {
    let handle = PrometheusBuilder::new().install_recorder().ok()?;
    register_metrics();
    Some(handle)
}

/// Serve `/metrics` on the given port from a background task.
///
/// The listener is bound before returning, so a port conflict is reported
/// to the caller instead of being lost in the task.
pub async fn start_metrics_server(
    port: u16,
    handle: PrometheusHandle,
) -> Result<(), std::io::Error> {
    let app = Router::new().route(
        "/metrics",
        get(move || {
            let handle = handle.clone();
            async move { handle.render() }
        }),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Metrics server stopped: {}", e);
        }
    });

    Ok(())
}

/// Register descriptions for every metric squadwatch records.
fn register_metrics() {
    // =========================================================================
    // Upstream
    // =========================================================================

    describe_counter!(
        "upstream_requests_total",
        "Upstream requests by endpoint and classified status (labels: endpoint, status)"
    );
    describe_counter!(
        "upstream_relay_failures_total",
        "Connection failures against a relay, each followed by a relay swap"
    );
    describe_histogram!(
        "upstream_request_duration_seconds",
        "Wall time of one upstream HTTP request, excluding spacing sleeps"
    );

    // =========================================================================
    // Synchronization
    // =========================================================================

    describe_counter!(
        "sync_outcomes_total",
        "Fetch-upsert cycles by outcome (label: outcome)"
    );
    describe_counter!("sync_news_items_total", "News items appended to the store");
    describe_counter!(
        "sync_tombstones_total",
        "Tombstone rows written to the store"
    );

    // =========================================================================
    // Drivers
    // =========================================================================

    describe_counter!("discovery_probes_total", "Candidate ids probed by discovery");
    describe_counter!("discovery_found_total", "New squadrons found by discovery");
    describe_gauge!(
        "discovery_last_candidate",
        "Last candidate id probed by the most recent discovery pass"
    );
    describe_counter!("refresh_synced_total", "Squadrons re-synchronized by refresh");
    describe_gauge!(
        "daemon_running",
        "Whether the squadwatch daemon is running (1=yes, 0=no)"
    );

    // =========================================================================
    // Notifications
    // =========================================================================

    describe_counter!(
        "notifications_total",
        "Notifications handed to the outbound channel (label: result)"
    );
}

/// Increment a counter.
#[inline]
pub fn increment(name: &'static str, count: u64) {
    metrics::counter!(name).increment(count);
}

/// Set a gauge value.
#[inline]
pub fn set_gauge(name: &'static str, value: f64) {
    metrics::gauge!(name).set(value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Once;

    static INIT: Once = Once::new();

    fn ensure_metrics_init() {
        INIT.call_once(|| {
            let _ = try_init_metrics();
        });
    }

    #[test]
    fn test_try_init_metrics_idempotent() {
        let handle1 = try_init_metrics();
        let handle2 = try_init_metrics();
        assert!(handle1.is_none() || handle2.is_none());
    }

    #[test]
    fn test_helpers_do_not_panic() {
        ensure_metrics_init();
        increment("discovery_probes_total", 0);
        increment("discovery_probes_total", 3);
        set_gauge("discovery_last_candidate", 70_000.0);
    }

    #[test]
    fn test_register_metrics_is_repeatable() {
        ensure_metrics_init();
        register_metrics();
        register_metrics();
    }
}
