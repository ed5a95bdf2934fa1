//! One fetch-upsert cycle for a single squadron.

use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use squadwatch_core::{NewsFeed, NewsPayload, Snapshot};

use crate::hooks::HookRegistry;
use crate::store::SnapshotStore;
use crate::upstream::{FetchOutcome, Upstream};
use crate::{Error, Result};

/// Result of [`Synchronizer::synchronize`].
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    /// A new live snapshot was stored.
    Synced(Snapshot),
    /// Upstream doesn't know the squadron.
    Absent,
    /// The squadron was already tombstoned; upstream was not asked.
    AlreadyTombstoned,
}

impl SyncOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Synced(_) => "synced",
            Self::Absent => "absent",
            Self::AlreadyTombstoned => "already_tombstoned",
        }
    }
}

/// Reconciles the store with upstream, one squadron at a time.
pub struct Synchronizer<U> {
    upstream: U,
    store: Arc<SnapshotStore>,
    hooks: HookRegistry,
}

impl<U: Upstream> Synchronizer<U> {
    pub fn new(upstream: U, store: Arc<SnapshotStore>, hooks: HookRegistry) -> Self {
        Self {
            upstream,
            store,
            hooks,
        }
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub fn upstream(&self) -> &U {
        &self.upstream
    }

    /// Fetch a squadron and record what upstream says about it.
    ///
    /// With `suppress_absence`, a 404 for a squadron the store has never
    /// seen alive leaves no trace; otherwise it is tombstoned so it won't be
    /// probed again. A squadron that was alive is always tombstoned on 404.
    ///
    /// # Errors
    ///
    /// - [`Error::UpstreamMaintenance`] when upstream answers 418.
    /// - [`Error::UnknownStatus`] for any unexpected status code.
    /// - Store, transport and observer errors as they occur.
    pub async fn synchronize(&self, squadron_id: i64, suppress_absence: bool) -> Result<SyncOutcome> {
        if self.store.is_tombstoned(squadron_id)? {
            tracing::trace!(squadron_id, "Already tombstoned, skipping upstream");
            return Ok(self.record(SyncOutcome::AlreadyTombstoned));
        }

        let outcome = match self.upstream.fetch_info(squadron_id).await? {
            FetchOutcome::Found(info) => {
                let mut info = info.normalize();
                let news = self.fetch_news(squadron_id).await;

                info.motd = match &news {
                    Some(feed) => feed.latest_motd(),
                    None => self.previous_motd(squadron_id)?,
                };

                let observed_at = Utc::now();
                let snapshot = self.store.insert_snapshot(&info, observed_at)?;
                tracing::debug!(
                    squadron_id,
                    name = %info.name,
                    members = info.member_count,
                    "Stored snapshot"
                );

                if let Some(feed) = news.filter(|feed| !feed.is_empty()) {
                    match self.store.insert_news(squadron_id, &feed, observed_at) {
                        Ok(count) => {
                            counter!("sync_news_items_total").increment(count as u64);
                        }
                        Err(e) => {
                            tracing::warn!(squadron_id, "Failed to store news: {}", e);
                        }
                    }
                }

                self.hooks.notify_change(&snapshot, &self.store)?;
                SyncOutcome::Synced(snapshot)
            }
            FetchOutcome::NotFound => {
                if self.store.has_live_snapshot(squadron_id)? {
                    tracing::info!(squadron_id, "Squadron disappeared upstream");
                    self.tombstone(squadron_id)?;
                } else if !suppress_absence {
                    self.mark_absent(squadron_id)?;
                }
                SyncOutcome::Absent
            }
            FetchOutcome::Unavailable => return Err(Error::UpstreamMaintenance),
            FetchOutcome::UnknownStatus { code, body } => {
                return Err(Error::UnknownStatus { code, body });
            }
        };

        Ok(self.record(outcome))
    }

    /// Tombstone a squadron, running the delete observers first.
    ///
    /// Returns whether a tombstone row was written.
    pub fn tombstone(&self, squadron_id: i64) -> Result<bool> {
        if self.store.is_tombstoned(squadron_id)? {
            return Ok(false);
        }
        self.hooks.notify_before_delete(squadron_id, &self.store)?;
        self.mark_absent(squadron_id)
    }

    /// Record that a squadron never seen alive doesn't exist upstream.
    ///
    /// No observers run; there is no live state to report on.
    pub fn mark_absent(&self, squadron_id: i64) -> Result<bool> {
        let written = self.store.tombstone(squadron_id, Utc::now())?;
        if written {
            counter!("sync_tombstones_total").increment(1);
        }
        Ok(written)
    }

    /// News for the squadron, or `None` if it couldn't be fetched this time.
    ///
    /// A feed that doesn't exist or can't be read is an empty feed, not a
    /// failure.
    async fn fetch_news(&self, squadron_id: i64) -> Option<NewsFeed> {
        match self.upstream.fetch_news(squadron_id).await {
            Ok(FetchOutcome::Found(NewsPayload::Feed(feed))) => Some(feed),
            Ok(FetchOutcome::Found(NewsPayload::Missing)) | Ok(FetchOutcome::NotFound) => {
                tracing::debug!(squadron_id, "No news for squadron");
                Some(NewsFeed::default())
            }
            Ok(FetchOutcome::Found(NewsPayload::Malformed(reason))) => {
                tracing::info!(squadron_id, "Ignoring malformed news payload: {}", reason);
                Some(NewsFeed::default())
            }
            Ok(FetchOutcome::Unavailable) => {
                tracing::warn!(squadron_id, "News unavailable during maintenance");
                None
            }
            Ok(FetchOutcome::UnknownStatus { code, .. }) => {
                tracing::warn!(squadron_id, code, "Unexpected status fetching news");
                None
            }
            Err(e) => {
                tracing::warn!(squadron_id, "Failed to fetch news: {}", e);
                None
            }
        }
    }

    /// Message of the day of the latest live snapshot, empty if none.
    fn previous_motd(&self, squadron_id: i64) -> Result<String> {
        Ok(self
            .store
            .latest(squadron_id)?
            .and_then(|snapshot| snapshot.info().map(|info| info.motd.clone()))
            .unwrap_or_default())
    }

    fn record(&self, outcome: SyncOutcome) -> SyncOutcome {
        counter!("sync_outcomes_total", "outcome" => outcome.as_str()).increment(1);
        outcome
    }
}
