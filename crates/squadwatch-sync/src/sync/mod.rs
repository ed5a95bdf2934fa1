//! Discovery and refresh of squadrons.
//!
//! Both drivers go through the same fetch-upsert cycle:
//!
//! ```text
//! ┌──────────────────┐       ┌──────────────────┐
//! │    Discovery     │       │     Refresh      │
//! │ (walk id space)  │       │  (oldest first)  │
//! └────────┬─────────┘       └────────┬─────────┘
//!          │ synchronize(id, true)    │ synchronize(id, false)
//!          └──────────┬───────────────┘
//!                     ▼
//!          ┌──────────────────────────┐
//!          │       Synchronizer       │──► Upstream (info, news/list)
//!          │ fetch, upsert, run hooks │──► SnapshotStore
//!          └──────────────────────────┘
//! ```
//!
//! Drivers poll a shared shutdown flag between cycles; a cycle in flight
//! always completes.
//!
//! # Usage
//!
//! ```ignore
//! use squadwatch_sync::sync::{DiscoveryConfig, Synchronizer, discover};
//!
//! let sync = Synchronizer::new(upstream, store, hooks);
//! let stats = discover(&sync, &DiscoveryConfig::default(), 0, &shutdown).await?;
//! println!("found {} new squadrons", stats.found);
//! ```

mod deadline;
mod discovery;
mod refresh;
mod synchronizer;

pub use deadline::WeeklyDeadline;
pub use discovery::{DiscoveryConfig, DiscoveryStats, StopReason, discover};
pub use refresh::{RefreshConfig, RefreshStats, refresh};
pub use synchronizer::{SyncOutcome, Synchronizer};
