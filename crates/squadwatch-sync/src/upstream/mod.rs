//! Upstream squadron API access.
//!
//! ```text
//! ┌──────────────┐   lease (LRU + spacing)   ┌─────────────┐
//! │ HttpUpstream │ ────────────────────────► │  RelayPool  │
//! └──────┬───────┘                           └─────────────┘
//!        │ GET info / news/list via the leased relay
//!        ▼
//!   FetchOutcome::{Found, NotFound, Unavailable, UnknownStatus}
//! ```
//!
//! Relay connection failures are absorbed here (swap relay, retry once).
//! Everything else reaches the caller as a [`FetchOutcome`] to be matched
//! exhaustively.

mod client;
mod relay;
mod token;

use std::future::Future;
use std::time::Duration;

use squadwatch_core::{NewsPayload, SquadronInfo};

pub use client::{HttpUpstream, StatusClass, classify_status};
pub use relay::{Relay, RelayLease, RelayPool};
pub use token::{StaticToken, TokenEndpoint, TokenSource};

use crate::Result;

/// Minimum spacing between two requests through the same relay.
pub const DEFAULT_REQUEST_SPACING: Duration = Duration::from_secs(3);

/// Default upstream API base.
pub const DEFAULT_BASE_URL: &str = "https://api.orerve.net/2.0/website/squadron/";

/// Outcome of one logical upstream fetch.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome<T> {
    Found(T),
    /// HTTP 404.
    NotFound,
    /// HTTP 418: upstream is down for maintenance.
    Unavailable,
    /// Any other status code.
    UnknownStatus { code: u16, body: String },
}

/// Configuration for the HTTP upstream client.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Base URL; `info` and `news/list` are resolved against it.
    pub base_url: String,
    /// Minimum spacing between requests through one relay.
    pub request_spacing: Duration,
    /// Per-request timeout.
    pub timeout: Duration,
    /// How many other relays to try after a connection failure.
    pub relay_retries: usize,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            request_spacing: DEFAULT_REQUEST_SPACING,
            timeout: Duration::from_secs(30),
            relay_retries: 1,
        }
    }
}

/// Source of squadron data.
///
/// One call is one logical fetch; implementations handle relay selection
/// and request spacing internally.
pub trait Upstream: Send + Sync {
    /// Fetch the squadron's attribute set.
    fn fetch_info(
        &self,
        squadron_id: i64,
    ) -> impl Future<Output = Result<FetchOutcome<SquadronInfo>>> + Send;

    /// Fetch the squadron's news feed.
    fn fetch_news(
        &self,
        squadron_id: i64,
    ) -> impl Future<Output = Result<FetchOutcome<NewsPayload>>> + Send;
}
