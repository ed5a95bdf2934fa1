//! Forward scan of the id space for squadrons not yet known locally.
//!
//! The scan starts at the first hole in the known-id sequence and walks
//! upwards until too many consecutive ids come back absent. Below the legacy
//! boundary upstream has long runs of dead ids, so the tolerance there is
//! large; at the frontier a handful of misses means we've caught up.
//!
//! Absent ids are not tombstoned straight away. Upstream is occasionally
//! inconsistent, and an id that 404s now may exist a moment later; only ids
//! followed by a confirmed hit are known gaps and get tombstoned.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use metrics::{counter, gauge};

use super::synchronizer::{SyncOutcome, Synchronizer};
use crate::Result;
use crate::upstream::Upstream;

/// Miss tolerance configuration.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Ids below this are legacy id space.
    pub legacy_boundary: i64,
    /// Consecutive misses tolerated below the legacy boundary.
    pub legacy_tolerance: usize,
    /// Consecutive misses tolerated at or above the legacy boundary.
    pub frontier_tolerance: usize,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            legacy_boundary: 65_000,
            legacy_tolerance: 5_000,
            frontier_tolerance: 5,
        }
    }
}

impl DiscoveryConfig {
    /// Consecutive misses after which a pass stops, for a candidate id.
    pub fn tolerance_for(&self, candidate: i64) -> usize {
        if candidate < self.legacy_boundary {
            self.legacy_tolerance
        } else {
            self.frontier_tolerance
        }
    }
}

/// Why a discovery pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Shutdown,
    /// Consecutive misses reached the tolerance.
    TriesExhausted,
}

/// Statistics from one discovery pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryStats {
    /// First candidate probed (or that would have been).
    pub first_candidate: i64,
    /// Last candidate probed, `first_candidate - 1` if none.
    pub last_candidate: i64,
    /// Upstream probes issued.
    pub probed: usize,
    /// Squadrons seen alive for the first time.
    pub found: usize,
    /// Absent ids tombstoned after a later hit.
    pub tombstoned: usize,
    /// Absent ids left untouched because no hit followed them.
    pub unconfirmed: Vec<i64>,
    pub stop: StopReason,
    pub duration: Duration,
}

/// Run one discovery pass.
///
/// `resume_offset` shifts the starting candidate past the first hole, to
/// skip a stretch already known to be dead.
///
/// # Errors
///
/// Stops at the first synchronization error, see
/// [`Synchronizer::synchronize`]. Pending misses are not tombstoned.
pub async fn discover<U: Upstream>(
    sync: &Synchronizer<U>,
    config: &DiscoveryConfig,
    resume_offset: i64,
    shutdown: &AtomicBool,
) -> Result<DiscoveryStats> {
    let started = Instant::now();
    let first_gap = sync.store().first_gap()?;
    let max_known = sync.store().max_known_id()?;
    let mut candidate = first_gap - 1 + resume_offset;

    tracing::info!(
        first_gap,
        max_known,
        resume_offset,
        "Starting discovery at id {}",
        candidate + 1
    );

    let mut stats = DiscoveryStats {
        first_candidate: candidate + 1,
        last_candidate: candidate,
        probed: 0,
        found: 0,
        tombstoned: 0,
        unconfirmed: Vec::new(),
        stop: StopReason::TriesExhausted,
        duration: Duration::ZERO,
    };
    let mut misses = 0usize;
    let mut failed: Vec<i64> = Vec::new();

    loop {
        if shutdown.load(Ordering::SeqCst) {
            tracing::info!("Shutdown requested, stopping discovery");
            stats.stop = StopReason::Shutdown;
            break;
        }

        candidate += 1;

        let tolerance = config.tolerance_for(candidate);
        if misses >= tolerance {
            tracing::info!(misses, tolerance, "Too many consecutive misses, stopping discovery");
            stats.stop = StopReason::TriesExhausted;
            break;
        }

        let known = sync.store().has_live_snapshot(candidate)?;
        let outcome = sync.synchronize(candidate, true).await?;
        stats.last_candidate = candidate;
        gauge!("discovery_last_candidate").set(candidate as f64);
        if !matches!(outcome, SyncOutcome::AlreadyTombstoned) {
            stats.probed += 1;
            counter!("discovery_probes_total").increment(1);
        }

        match outcome {
            SyncOutcome::Synced(_) => {
                if !known {
                    stats.found += 1;
                    counter!("discovery_found_total").increment(1);
                    tracing::info!(squadron_id = candidate, "Discovered squadron");
                }
                misses = 0;

                for id in failed.drain(..) {
                    if sync.mark_absent(id)? {
                        stats.tombstoned += 1;
                    }
                }
            }
            SyncOutcome::Absent => {
                tracing::debug!(squadron_id = candidate, misses, "Candidate absent");
                failed.push(candidate);
                misses += 1;
            }
            // Known gap, neither a hit nor a fresh miss
            SyncOutcome::AlreadyTombstoned => {}
        }
    }

    if !failed.is_empty() {
        tracing::debug!("Leaving {} unconfirmed misses untouched", failed.len());
    }
    stats.unconfirmed = failed;
    stats.duration = started.elapsed();

    tracing::info!(
        "Discovery finished ({:?}): probed {}, found {}, tombstoned {}, last candidate {}",
        stats.stop,
        stats.probed,
        stats.found,
        stats.tombstoned,
        stats.last_candidate
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::hooks::HookRegistry;
    use crate::store::SnapshotStore;
    use crate::testing::{FakeUpstream, squadron};
    use crate::upstream::FetchOutcome;
    use chrono::Utc;
    use std::sync::Arc;

    fn frontier(tolerance: usize) -> DiscoveryConfig {
        DiscoveryConfig {
            legacy_boundary: 0,
            legacy_tolerance: 0,
            frontier_tolerance: tolerance,
        }
    }

    /// Store with live squadrons 1..=9 and an upstream that knows them.
    fn seeded(upstream: FakeUpstream) -> Synchronizer<FakeUpstream> {
        let store = Arc::new(SnapshotStore::open_in_memory().unwrap());
        for id in 1..=9 {
            store.insert_snapshot(&squadron(id), Utc::now()).unwrap();
        }
        Synchronizer::new(upstream, store, HookRegistry::new())
    }

    #[test]
    fn test_tolerance_tiers() {
        let config = DiscoveryConfig::default();
        assert_eq!(config.tolerance_for(1), 5_000);
        assert_eq!(config.tolerance_for(64_999), 5_000);
        assert_eq!(config.tolerance_for(65_000), 5);
    }

    #[tokio::test]
    async fn test_misses_tombstoned_after_later_hit() {
        let upstream = FakeUpstream::new();
        upstream.set_info(12, FetchOutcome::Found(squadron(12)));
        let sync = seeded(upstream);
        let shutdown = AtomicBool::new(false);

        let stats = discover(&sync, &frontier(5), 0, &shutdown).await.unwrap();

        assert_eq!(stats.first_candidate, 10);
        assert_eq!(stats.found, 1);
        assert_eq!(stats.tombstoned, 2);
        assert_eq!(stats.stop, StopReason::TriesExhausted);
        assert!(sync.store().is_tombstoned(10).unwrap());
        assert!(sync.store().is_tombstoned(11).unwrap());

        // 13..=17 missed after the hit and stay unknown
        assert_eq!(stats.unconfirmed, vec![13, 14, 15, 16, 17]);
        assert_eq!(stats.last_candidate, 17);
        for id in 13..=17 {
            assert_eq!(sync.store().snapshot_count(id).unwrap(), 0);
        }
        assert_eq!(
            sync.upstream().info_calls(),
            vec![10, 11, 12, 13, 14, 15, 16, 17]
        );
    }

    #[tokio::test]
    async fn test_misses_untouched_when_tries_exhausted() {
        let upstream = FakeUpstream::new();
        upstream.set_info(12, FetchOutcome::Found(squadron(12)));
        let sync = seeded(upstream);
        let shutdown = AtomicBool::new(false);

        let stats = discover(&sync, &frontier(2), 0, &shutdown).await.unwrap();

        assert_eq!(stats.stop, StopReason::TriesExhausted);
        assert_eq!(stats.found, 0);
        assert_eq!(stats.unconfirmed, vec![10, 11]);
        assert_eq!(sync.store().snapshot_count(10).unwrap(), 0);
        assert_eq!(sync.store().snapshot_count(11).unwrap(), 0);
        assert_eq!(sync.store().snapshot_count(12).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_misses_untouched_on_shutdown() {
        let shutdown = Arc::new(AtomicBool::new(false));
        let upstream = FakeUpstream::new();
        upstream.set_info(12, FetchOutcome::Found(squadron(12)));
        upstream.trip_on_call(11, Arc::clone(&shutdown));
        let sync = seeded(upstream);

        let stats = discover(&sync, &frontier(5), 0, &shutdown).await.unwrap();

        assert_eq!(stats.stop, StopReason::Shutdown);
        assert_eq!(stats.probed, 2);
        assert_eq!(stats.unconfirmed, vec![10, 11]);
        assert_eq!(sync.store().snapshot_count(10).unwrap(), 0);
        assert_eq!(sync.store().snapshot_count(11).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_before_first_probe() {
        let sync = seeded(FakeUpstream::new());
        let shutdown = AtomicBool::new(true);

        let stats = discover(&sync, &frontier(5), 0, &shutdown).await.unwrap();

        assert_eq!(stats.stop, StopReason::Shutdown);
        assert_eq!(stats.probed, 0);
        assert_eq!(stats.last_candidate, 9);
        assert!(sync.upstream().info_calls().is_empty());
    }

    #[tokio::test]
    async fn test_resume_offset_skips_ahead() {
        let upstream = FakeUpstream::new();
        upstream.set_info(20, FetchOutcome::Found(squadron(20)));
        let sync = seeded(upstream);
        let shutdown = AtomicBool::new(false);

        let stats = discover(&sync, &frontier(1), 10, &shutdown).await.unwrap();

        assert_eq!(stats.first_candidate, 20);
        assert_eq!(stats.found, 1);
        assert_eq!(sync.upstream().info_calls(), vec![20, 21]);
    }

    #[tokio::test]
    async fn test_starts_at_first_hole() {
        let upstream = FakeUpstream::new();
        for id in [1, 2, 4, 5] {
            upstream.set_info(id, FetchOutcome::Found(squadron(id)));
        }
        let store = Arc::new(SnapshotStore::open_in_memory().unwrap());
        for id in [1, 2, 4, 5] {
            store.insert_snapshot(&squadron(id), Utc::now()).unwrap();
        }
        let sync = Synchronizer::new(upstream, store, HookRegistry::new());
        let shutdown = AtomicBool::new(false);

        let stats = discover(&sync, &frontier(2), 0, &shutdown).await.unwrap();

        // 3 is a miss confirmed by the refresh of 4
        assert_eq!(stats.first_candidate, 3);
        assert_eq!(stats.found, 0);
        assert_eq!(stats.tombstoned, 1);
        assert!(sync.store().is_tombstoned(3).unwrap());
        assert_eq!(sync.upstream().info_calls(), vec![3, 4, 5, 6, 7]);
    }

    #[tokio::test]
    async fn test_tombstoned_candidates_skip_upstream() {
        let sync = seeded(FakeUpstream::new());
        sync.store().tombstone(10, Utc::now()).unwrap();
        sync.store().tombstone(12, Utc::now()).unwrap();
        let shutdown = AtomicBool::new(false);

        // 10 is known, so the first hole is 11
        let stats = discover(&sync, &frontier(2), 0, &shutdown).await.unwrap();

        assert_eq!(stats.first_candidate, 11);
        assert_eq!(sync.upstream().info_calls(), vec![11, 13]);
        assert_eq!(stats.unconfirmed, vec![11, 13]);
        assert_eq!(stats.probed, 2);
        assert_eq!(stats.last_candidate, 13);
    }

    #[tokio::test]
    async fn test_maintenance_stops_pass_without_tombstoning() {
        let upstream = FakeUpstream::new();
        upstream.set_info(11, FetchOutcome::Unavailable);
        upstream.set_info(12, FetchOutcome::Found(squadron(12)));
        let sync = seeded(upstream);
        let shutdown = AtomicBool::new(false);

        let err = discover(&sync, &frontier(5), 0, &shutdown)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::UpstreamMaintenance));
        assert!(err.is_retryable());
        // 10 missed before the outage and stays unknown
        assert_eq!(sync.store().snapshot_count(10).unwrap(), 0);
        assert_eq!(sync.store().snapshot_count(11).unwrap(), 0);
        assert_eq!(sync.upstream().info_calls(), vec![10, 11]);
    }

    #[tokio::test]
    async fn test_legacy_tolerance() {
        let sync = seeded(FakeUpstream::new());
        let config = DiscoveryConfig {
            legacy_boundary: 13,
            legacy_tolerance: 10,
            frontier_tolerance: 2,
        };
        let shutdown = AtomicBool::new(false);

        let stats = discover(&sync, &config, 0, &shutdown).await.unwrap();

        // 10, 11, 12 under the legacy tolerance; at 13 two misses are enough
        assert_eq!(stats.last_candidate, 12);
        assert_eq!(stats.probed, 3);
    }
}
