//! Squadwatch discovery and refresh engine.
//!
//! Keeps a local, append-only replica of upstream squadrons: new squadrons
//! are found by scanning the id space, known ones are re-fetched oldest
//! first, and every change between consecutive snapshots can be reported.
//!
//! # Modules
//!
//! - [`store`] - SQLite snapshot history and news
//! - [`upstream`] - Relay pool and the HTTP client for the squadron API
//! - [`sync`] - Fetch-upsert cycle, discovery scanner, refresh scheduler
//! - [`hooks`] - Change and pre-delete observers, built-in alerts
//! - [`notify`] - Outbound notification channel
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐
//! │    Discovery    │     │     Refresh     │
//! └────────┬────────┘     └────────┬────────┘
//!          └───────────┬───────────┘
//!                      ▼
//!             ┌─────────────────┐        ┌─────────────────┐
//!             │  Synchronizer   │ ─────► │  HttpUpstream   │ ──► relays ──► API
//!             └────────┬────────┘        └─────────────────┘
//!                      │
//!          ┌───────────┴───────────┐
//!          ▼                       ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │  SnapshotStore  │     │  HookRegistry   │ ──► Notifier
//! └─────────────────┘     └─────────────────┘
//! ```
//!
//! History is never rewritten: a squadron that disappears upstream gets a
//! tombstone row, and a tombstoned id is never requested again.

pub mod error;
pub mod hooks;
pub mod notify;
pub mod store;
pub mod sync;
pub mod upstream;

#[cfg(test)]
mod testing;

// Re-export commonly used types at crate root
pub use error::{Error, Result};

pub use hooks::{
    ChangeObserver, DeleteObserver, HookRegistry, NewSquadronAlert, RemovalAlert,
    SquadronChangeAlert, WatchConfig,
};
pub use notify::{LogNotifier, Notifier, WebhookNotifier};
pub use store::SnapshotStore;
pub use sync::{
    DiscoveryConfig, DiscoveryStats, RefreshConfig, RefreshStats, StopReason, SyncOutcome,
    Synchronizer, WeeklyDeadline, discover, refresh,
};
pub use upstream::{
    FetchOutcome, HttpUpstream, RelayPool, StaticToken, TokenEndpoint, TokenSource, Upstream,
    UpstreamConfig,
};
