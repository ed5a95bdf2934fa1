//! Re-synchronization of known squadrons, stalest first.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use metrics::counter;

use super::deadline::WeeklyDeadline;
use super::synchronizer::{SyncOutcome, Synchronizer};
use crate::Result;
use crate::upstream::Upstream;

/// Refresh pass configuration.
#[derive(Debug, Clone)]
pub struct RefreshConfig {
    /// Maximum squadrons refreshed per pass.
    pub batch_size: usize,
    /// Only refresh squadrons not observed since the last deadline.
    pub deadline_aligned: bool,
    pub deadline: WeeklyDeadline,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            deadline_aligned: false,
            deadline: WeeklyDeadline::default(),
        }
    }
}

/// Statistics from one refresh pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshStats {
    /// Squadrons selected for the pass.
    pub selected: usize,
    pub synced: usize,
    /// Squadrons that turned out to be gone (and were tombstoned).
    pub absent: usize,
    /// Squadrons already tombstoned.
    pub skipped: usize,
    /// Whether shutdown cut the pass short.
    pub interrupted: bool,
}

/// Run one refresh pass.
///
/// With `target`, only that squadron is synchronized, and a 404 for a
/// squadron never seen alive leaves no tombstone. Otherwise the
/// `batch_size` least recently observed live squadrons are synchronized in
/// order; with deadline alignment only those last observed before the most
/// recent deadline (relative to `now`) are eligible.
///
/// # Errors
///
/// Stops at the first synchronization error, see
/// [`Synchronizer::synchronize`].
pub async fn refresh<U: Upstream>(
    sync: &Synchronizer<U>,
    config: &RefreshConfig,
    target: Option<i64>,
    shutdown: &AtomicBool,
    now: DateTime<Utc>,
) -> Result<RefreshStats> {
    let mut stats = RefreshStats::default();

    if let Some(squadron_id) = target {
        stats.selected = 1;
        if shutdown.load(Ordering::SeqCst) {
            stats.interrupted = true;
            return Ok(stats);
        }
        tracing::info!(squadron_id, "Refreshing single squadron");
        let outcome = sync.synchronize(squadron_id, true).await?;
        tally(&mut stats, &outcome);
        return Ok(stats);
    }

    let observed_before = config
        .deadline_aligned
        .then(|| config.deadline.most_recent(now));
    let ids = sync
        .store()
        .stale_squadrons(config.batch_size, observed_before)?;
    stats.selected = ids.len();

    match observed_before {
        Some(cutoff) => tracing::info!(
            "Refreshing {} squadrons not observed since {}",
            ids.len(),
            cutoff
        ),
        None => tracing::info!("Refreshing {} stalest squadrons", ids.len()),
    }

    for squadron_id in ids {
        if shutdown.load(Ordering::SeqCst) {
            tracing::info!("Shutdown requested, stopping refresh");
            stats.interrupted = true;
            break;
        }

        let outcome = sync.synchronize(squadron_id, false).await?;
        tally(&mut stats, &outcome);
    }

    tracing::info!(
        "Refresh finished: {} synced, {} absent, {} skipped of {} selected",
        stats.synced,
        stats.absent,
        stats.skipped,
        stats.selected
    );
    Ok(stats)
}

fn tally(stats: &mut RefreshStats, outcome: &SyncOutcome) {
    match outcome {
        SyncOutcome::Synced(_) => {
            stats.synced += 1;
            counter!("refresh_synced_total").increment(1);
        }
        SyncOutcome::Absent => stats.absent += 1,
        SyncOutcome::AlreadyTombstoned => stats.skipped += 1,
    }
}
