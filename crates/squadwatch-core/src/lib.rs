//! Core types and shared utilities for squadwatch.
//!
//! This crate provides:
//! - Upstream squadron payloads and the snapshot model (live vs tombstoned)
//! - News feed parsing, including the upstream's list-shaped irregularity
//! - Tag-set diffing and the tag catalog used to present diffs
//! - Prometheus metrics helpers
//! - Shared error types

mod error;
pub mod metrics;
pub mod news;
pub mod squadron;
pub mod tags;

pub use error::{Error, Result};
pub use news::{NewsEntry, NewsFeed, NewsPayload, PUBLIC_STATEMENTS};
pub use squadron::{
    InfoEnvelope, SeasonScores, Snapshot, SquadronInfo, SquadronState, decode_hex_text,
};
pub use tags::{GroupedTags, TagCatalog, TagCollection, TagDefinition, TagDiff, humanize};
