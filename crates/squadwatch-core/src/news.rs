//! Squadron news feed parsing.
//!
//! The upstream `news/list` response wraps an object keyed by news bucket
//! (`public_statements`, `activity`, ...), plus an `id` key echoing the
//! squadron. Some squadrons get a list back instead of an object; that shape
//! is treated as "no news" for the squadron rather than an error.

use serde::Deserialize;
use serde_json::Value;

/// Bucket whose first entry holds the squadron's message of the day.
pub const PUBLIC_STATEMENTS: &str = "public_statements";

/// One upstream news entry, kept as loosely typed as upstream sends it.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NewsEntry {
    pub id: Option<Value>,
    pub date: Option<Value>,
    pub category: Option<Value>,
    pub activity: Option<Value>,
    pub season: Option<Value>,
    pub bookmark: Option<Value>,
    pub motd: Option<Value>,
    pub author: Option<Value>,
    pub cmdr_id: Option<Value>,
    pub user_id: Option<Value>,
}

/// News entries grouped by bucket, sorted by bucket name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewsFeed {
    pub buckets: Vec<(String, Vec<NewsEntry>)>,
}

impl NewsFeed {
    /// Message of the day: `motd` of the newest public statement, or empty.
    pub fn latest_motd(&self) -> String {
        self.buckets
            .iter()
            .find(|(bucket, _)| bucket == PUBLIC_STATEMENTS)
            .and_then(|(_, entries)| entries.first())
            .and_then(|entry| entry.motd.as_ref())
            .map(|motd| match motd {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            })
            .unwrap_or_default()
    }

    /// Total number of entries across all buckets.
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|(_, entries)| entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Result of interpreting a news payload.
#[derive(Debug, Clone, PartialEq)]
pub enum NewsPayload {
    Feed(NewsFeed),
    /// Payload carried no `id`: upstream doesn't know the squadron.
    Missing,
    /// Payload had an unexpected shape (e.g. a list).
    Malformed(String),
}

impl NewsPayload {
    /// Interpret the body of a `news/list` response.
    pub fn from_response(body: &Value) -> Self {
        match body.get("squadron") {
            Some(inner) => Self::from_squadron_value(inner),
            None => Self::Malformed("response has no 'squadron' key".to_string()),
        }
    }

    /// Interpret the value under the `squadron` key.
    pub fn from_squadron_value(value: &Value) -> Self {
        let map = match value {
            Value::Object(map) => map,
            Value::Array(items) => {
                return Self::Malformed(format!("news payload is a list of {} items", items.len()));
            }
            other => return Self::Malformed(format!("unexpected news payload: {}", other)),
        };

        if !map.contains_key("id") {
            return Self::Missing;
        }

        let mut feed = NewsFeed::default();
        for (bucket, entries) in map.iter().filter(|(key, _)| key.as_str() != "id") {
            let Some(entries) = entries.as_array() else {
                tracing::debug!(bucket = %bucket, "skipping non-list news bucket");
                continue;
            };

            let parsed = entries
                .iter()
                .filter_map(|entry| match NewsEntry::deserialize(entry) {
                    Ok(e) => Some(e),
                    Err(e) => {
                        tracing::debug!(bucket = %bucket, "skipping unreadable news entry: {}", e);
                        None
                    }
                })
                .collect();
            feed.buckets.push((bucket.clone(), parsed));
        }

        Self::Feed(feed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_feed_with_public_statement() {
        let body = json!({
            "squadron": {
                "id": 42,
                "public_statements": [
                    {"id": 9, "date": 1700000000, "motd": "Fly safe o7", "author": "Aurora", "cmdr_id": 7, "user_id": 8},
                    {"id": 3, "date": 1600000000, "motd": "old", "author": "Aurora"}
                ],
                "activity": [
                    {"id": 11, "category": "Squadrons_Activity_Promotion", "activity": "promoted"}
                ]
            }
        });

        let NewsPayload::Feed(feed) = NewsPayload::from_response(&body) else {
            panic!("expected feed");
        };
        assert_eq!(feed.len(), 3);
        assert_eq!(feed.latest_motd(), "Fly safe o7");
        assert!(feed.buckets.iter().all(|(bucket, _)| bucket != "id"));
    }

    #[test]
    fn test_missing_id_means_missing() {
        let body = json!({"squadron": {"public_statements": []}});
        assert_eq!(NewsPayload::from_response(&body), NewsPayload::Missing);
    }

    #[test]
    fn test_list_payload_is_malformed() {
        let body = json!({"squadron": []});
        assert!(matches!(
            NewsPayload::from_response(&body),
            NewsPayload::Malformed(_)
        ));
    }

    #[test]
    fn test_motd_empty_without_statements() {
        let body = json!({"squadron": {"id": 1, "activity": []}});
        let NewsPayload::Feed(feed) = NewsPayload::from_response(&body) else {
            panic!("expected feed");
        };
        assert_eq!(feed.latest_motd(), "");
        assert!(feed.is_empty());
    }
}
