//! Relay pool with per-relay request spacing.
//!
//! A relay is either a proxy URL or the direct route (`None`). Every request
//! goes through the least recently used relay; if that relay was used less
//! than `spacing` ago, the caller sleeps out the remainder first.

use std::path::Path;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Deserialize;
use tokio::time::Instant;

use crate::{Error, Result};

/// One relay and when it was last used.
#[derive(Debug, Clone)]
pub struct Relay {
    /// Proxy URL, or `None` for a direct connection.
    pub url: Option<String>,
    last_used: Option<Instant>,
}

/// A relay reserved for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayLease {
    pub index: usize,
    pub url: Option<String>,
    /// How long to wait before sending so the relay's spacing is respected.
    pub wait: Duration,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RelayEntry {
    Url(Option<String>),
    Object { url: Option<String> },
}

/// Round-robin relay selection honouring a minimum spacing per relay.
pub struct RelayPool {
    relays: Mutex<Vec<Relay>>,
    spacing: Duration,
}

impl RelayPool {
    /// Build a pool from relay URLs. An empty list means one direct relay.
    pub fn new(urls: Vec<Option<String>>, spacing: Duration) -> Self {
        let urls = if urls.is_empty() { vec![None] } else { urls };
        let relays = urls
            .into_iter()
            .map(|url| Relay {
                url,
                last_used: None,
            })
            .collect();

        Self {
            relays: Mutex::new(relays),
            spacing,
        }
    }

    /// A pool with only the direct route.
    pub fn direct(spacing: Duration) -> Self {
        Self::new(Vec::new(), spacing)
    }

    /// Load relays from a JSON file.
    ///
    /// Accepts a list of URL strings (or `null` for direct) or a list of
    /// `{"url": ...}` objects. A missing file yields a direct-only pool.
    pub fn load(path: &Path, spacing: Duration) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                let pool = Self::from_json(&contents, spacing)?;
                tracing::info!("Loaded {} relays from {}", pool.len(), path.display());
                Ok(pool)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No relay file at {}, using direct connection", path.display());
                Ok(Self::direct(spacing))
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    pub fn from_json(contents: &str, spacing: Duration) -> Result<Self> {
        let entries: Vec<RelayEntry> = serde_json::from_str(contents)?;
        let urls = entries
            .into_iter()
            .map(|entry| match entry {
                RelayEntry::Url(url) | RelayEntry::Object { url } => url,
            })
            .collect();
        Ok(Self::new(urls, spacing))
    }

    pub fn len(&self) -> usize {
        self.relays.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.relays.lock().is_empty()
    }

    /// Relay URLs in pool order.
    pub fn urls(&self) -> Vec<Option<String>> {
        self.relays.lock().iter().map(|r| r.url.clone()).collect()
    }

    pub fn spacing(&self) -> Duration {
        self.spacing
    }

    /// Reserve the least recently used relay, skipping `exclude` when any
    /// other relay is available.
    ///
    /// The relay is marked as used at the moment it becomes ready, so a
    /// second lease taken before the request completes picks another relay
    /// or queues behind this one.
    pub fn lease(&self, exclude: &[usize]) -> RelayLease {
        let mut relays = self.relays.lock();
        let now = Instant::now();

        let index = least_recently_used(
            relays
                .iter()
                .enumerate()
                .filter(|(index, _)| !exclude.contains(index)),
        )
        .or_else(|| least_recently_used(relays.iter().enumerate()))
        .unwrap_or(0);

        let relay = &mut relays[index];
        let ready_at = match relay.last_used {
            Some(last) => (last + self.spacing).max(now),
            None => now,
        };
        relay.last_used = Some(ready_at);

        RelayLease {
            index,
            url: relay.url.clone(),
            wait: ready_at.saturating_duration_since(now),
        }
    }

    /// Reserve a relay and sleep until it may be used.
    pub async fn acquire(&self, exclude: &[usize]) -> RelayLease {
        let lease = self.lease(exclude);
        if !lease.wait.is_zero() {
            tracing::debug!(
                relay = lease.url.as_deref().unwrap_or("direct"),
                "Sleeping {:?} to respect request spacing",
                lease.wait
            );
            tokio::time::sleep(lease.wait).await;
        }
        lease
    }

    /// Record that a request through the relay just finished (or failed).
    pub fn mark_used(&self, index: usize) {
        if let Some(relay) = self.relays.lock().get_mut(index) {
            relay.last_used = Some(Instant::now());
        }
    }
}

/// Unused relays sort first; ties go to the earliest in pool order.
fn least_recently_used<'a>(relays: impl Iterator<Item = (usize, &'a Relay)>) -> Option<usize> {
    relays
        .min_by_key(|(_, relay)| relay.last_used)
        .map(|(index, _)| index)
}
