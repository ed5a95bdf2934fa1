//! Squadron user tags: set differences and the tag catalog.
//!
//! Upstream reports tags as small integers. The catalog (the `available.json`
//! reference file) maps each id to a localised name and the collection it
//! belongs to, so diffs can be presented grouped by collection:
//!
//! ```text
//! Added:
//!     Language:
//!         Russian
//! Removed:
//!     Play style:
//!         Casual
//! ```

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::path::Path;

use serde::Deserialize;

use crate::{Error, Result};

/// Classification of every tag present in either of two tag sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagDiff {
    pub added: BTreeSet<i64>,
    pub removed: BTreeSet<i64>,
    pub unchanged: BTreeSet<i64>,
}

impl TagDiff {
    /// Compare two tag sets. Input order and duplicates are irrelevant.
    pub fn between(old: &[i64], new: &[i64]) -> Self {
        let old: BTreeSet<i64> = old.iter().copied().collect();
        let new: BTreeSet<i64> = new.iter().copied().collect();

        let mut diff = Self::default();
        for tag in old.symmetric_difference(&new) {
            if new.contains(tag) {
                diff.added.insert(*tag);
            } else {
                diff.removed.insert(*tag);
            }
        }
        diff.unchanged = old.intersection(&new).copied().collect();
        diff
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct AvailableFile {
    #[serde(rename = "SquadronTagData")]
    tag_data: TagData,
}

#[derive(Debug, Deserialize)]
struct TagData {
    #[serde(rename = "SquadronTagCollections")]
    collections: Vec<TagCollection>,
}

/// A named group of tags (language, play style, ...).
#[derive(Debug, Clone, Deserialize)]
pub struct TagCollection {
    #[serde(rename = "localisedCollectionName")]
    pub name: String,
    #[serde(rename = "SquadronTags")]
    pub tags: Vec<TagDefinition>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TagDefinition {
    #[serde(rename = "ServerUniqueId")]
    pub id: i64,
    #[serde(rename = "LocalisedString")]
    pub name: String,
}

/// Tags grouped by collection, collections in order of first appearance.
pub type GroupedTags = Vec<(String, Vec<String>)>;

/// Lookup table from tag id to collection and display name.
#[derive(Debug, Clone, Default)]
pub struct TagCatalog {
    collections: Vec<TagCollection>,
}

impl TagCatalog {
    pub fn new(collections: Vec<TagCollection>) -> Self {
        Self { collections }
    }

    /// Load the catalog from an `available.json` file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        let file: AvailableFile = serde_json::from_str(contents)?;
        Ok(Self::new(file.tag_data.collections))
    }

    /// Resolve a tag id to `(collection name, tag name)`.
    pub fn resolve(&self, tag: i64) -> Result<(&str, &str)> {
        self.collections
            .iter()
            .find_map(|collection| {
                collection
                    .tags
                    .iter()
                    .find(|t| t.id == tag)
                    .map(|t| (collection.name.as_str(), t.name.as_str()))
            })
            .ok_or(Error::UnknownTag(tag))
    }

    /// Group tag ids by their collection. Unknown ids land in an
    /// "Unknown" collection under their numeric id.
    pub fn group<I>(&self, tags: I) -> GroupedTags
    where
        I: IntoIterator<Item = i64>,
    {
        let mut grouped: GroupedTags = Vec::new();
        for tag in tags {
            let (collection, name) = match self.resolve(tag) {
                Ok((collection, name)) => (collection.to_string(), name.to_string()),
                Err(_) => ("Unknown".to_string(), tag.to_string()),
            };

            match grouped.iter_mut().find(|(c, _)| *c == collection) {
                Some((_, names)) => names.push(name),
                None => grouped.push((collection, vec![name])),
            }
        }
        grouped
    }

    /// Render a tag diff grouped by collection. Empty string if nothing changed.
    pub fn describe_diff(&self, diff: &TagDiff) -> String {
        let mut out = String::new();
        if !diff.added.is_empty() {
            out.push_str("Added:\n");
            out.push_str(&indent(&humanize(&self.group(diff.added.iter().copied()))));
        }
        if !diff.removed.is_empty() {
            out.push_str("Removed:\n");
            out.push_str(&indent(&humanize(&self.group(diff.removed.iter().copied()))));
        }
        out
    }
}

/// Render grouped tags as an indented outline.
pub fn humanize(grouped: &GroupedTags) -> String {
    let mut out = String::new();
    for (collection, names) in grouped {
        let _ = writeln!(out, "{}:", collection);
        for name in names {
            let _ = writeln!(out, "    {}", name);
        }
    }
    out
}

fn indent(text: &str) -> String {
    text.lines().map(|line| format!("    {}\n", line)).collect()
}
