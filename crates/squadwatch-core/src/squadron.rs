//! Squadron payloads and snapshots.
//!
//! [`SquadronInfo`] mirrors the upstream `info` payload. A [`Snapshot`] is one
//! stored observation of a squadron: either the full attribute set or a
//! tombstone recording that the squadron is gone upstream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::{Error, Result};

/// Body of a successful `info` response.
#[derive(Debug, Clone, Deserialize)]
pub struct InfoEnvelope {
    pub squadron: SquadronInfo,
}

/// Attribute set of a live squadron as reported upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SquadronInfo {
    pub id: i64,
    pub name: String,
    pub tag: String,
    #[serde(rename = "ownerName")]
    pub owner_name: String,
    #[serde(rename = "ownerId", deserialize_with = "string_or_number")]
    pub owner_id: String,
    pub platform: String,
    #[serde(default)]
    pub created: String,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub created_ts: i64,
    #[serde(rename = "acceptingNewMembers", default, deserialize_with = "flag")]
    pub accepting_new_members: bool,
    #[serde(rename = "powerId", default)]
    pub power_id: Option<i64>,
    #[serde(rename = "powerName", default)]
    pub power_name: Option<String>,
    #[serde(rename = "superpowerId", default)]
    pub superpower_id: Option<i64>,
    #[serde(rename = "superpowerName", default)]
    pub superpower_name: Option<String>,
    #[serde(rename = "factionId", default)]
    pub faction_id: Option<i64>,
    #[serde(rename = "factionName", default)]
    pub faction_name: Option<String>,
    #[serde(rename = "userTags", default)]
    pub user_tags: Vec<i64>,
    #[serde(rename = "memberCount", default)]
    pub member_count: i64,
    #[serde(rename = "pendingCount", default)]
    pub pending_count: i64,
    #[serde(default, deserialize_with = "flag")]
    pub full: bool,
    #[serde(rename = "publicComms", default, deserialize_with = "flag")]
    pub public_comms: bool,
    #[serde(rename = "publicCommsOverride", default, deserialize_with = "flag")]
    pub public_comms_override: bool,
    #[serde(rename = "publicCommsAvailable", default, deserialize_with = "flag")]
    pub public_comms_available: bool,
    #[serde(flatten)]
    pub scores: SeasonScores,
    /// Latest public statement, filled in from the news feed.
    #[serde(default)]
    pub motd: String,
}

impl SquadronInfo {
    /// Decode the hex-encoded owner name in place.
    ///
    /// Values that aren't valid hex-encoded UTF-8 are kept as-is.
    pub fn normalize(mut self) -> Self {
        match decode_hex_text(&self.owner_name) {
            Ok(decoded) => self.owner_name = decoded,
            Err(e) => {
                tracing::warn!(
                    squadron_id = self.id,
                    owner_name = %self.owner_name,
                    "keeping raw owner name: {}",
                    e
                );
            }
        }
        self
    }

    /// Whether the squadron carries the given user tag.
    pub fn has_tag(&self, tag: i64) -> bool {
        self.user_tags.contains(&tag)
    }

    /// Storage form of the tag set: a JSON array in upstream order.
    pub fn user_tags_json(&self) -> String {
        serde_json::to_string(&self.user_tags).unwrap_or_else(|_| "[]".to_string())
    }
}

/// Current and previous season scores per activity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeasonScores {
    #[serde(default)]
    pub current_season_trade_score: i64,
    #[serde(default)]
    pub previous_season_trade_score: i64,
    #[serde(default)]
    pub current_season_combat_score: i64,
    #[serde(default)]
    pub previous_season_combat_score: i64,
    #[serde(default)]
    pub current_season_exploration_score: i64,
    #[serde(default)]
    pub previous_season_exploration_score: i64,
    #[serde(default)]
    pub current_season_cqc_score: i64,
    #[serde(default)]
    pub previous_season_cqc_score: i64,
    #[serde(default)]
    pub current_season_bgs_score: i64,
    #[serde(default)]
    pub previous_season_bgs_score: i64,
    #[serde(default)]
    pub current_season_powerplay_score: i64,
    #[serde(default)]
    pub previous_season_powerplay_score: i64,
    #[serde(default)]
    pub current_season_aegis_score: i64,
    #[serde(default)]
    pub previous_season_aegis_score: i64,
}

impl SeasonScores {
    pub fn current_sum(&self) -> i64 {
        self.current_season_trade_score
            + self.current_season_combat_score
            + self.current_season_exploration_score
            + self.current_season_cqc_score
            + self.current_season_bgs_score
            + self.current_season_powerplay_score
            + self.current_season_aegis_score
    }

    pub fn previous_sum(&self) -> i64 {
        self.previous_season_trade_score
            + self.previous_season_combat_score
            + self.previous_season_exploration_score
            + self.previous_season_cqc_score
            + self.previous_season_bgs_score
            + self.previous_season_powerplay_score
            + self.previous_season_aegis_score
    }
}

/// State carried by one snapshot row.
#[derive(Debug, Clone, PartialEq)]
pub enum SquadronState {
    Live(Box<SquadronInfo>),
    /// Confirmed absent upstream. Persisted as a row with every attribute null.
    Tombstoned,
}

/// One immutable observation of a squadron.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Monotonic row id; the highest one for a squadron is its current state.
    pub snapshot_id: i64,
    pub squadron_id: i64,
    pub observed_at: DateTime<Utc>,
    pub state: SquadronState,
}

impl Snapshot {
    pub fn is_tombstone(&self) -> bool {
        matches!(self.state, SquadronState::Tombstoned)
    }

    /// The attribute set, if this snapshot is live.
    pub fn info(&self) -> Option<&SquadronInfo> {
        match &self.state {
            SquadronState::Live(info) => Some(info),
            SquadronState::Tombstoned => None,
        }
    }
}

/// Decode a hex string into UTF-8 text.
pub fn decode_hex_text(value: &str) -> Result<String> {
    let bytes = hex::decode(value).map_err(|e| Error::HexDecode(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| Error::InvalidField {
        field: "ownerName",
        reason: e.to_string(),
    })
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

fn lenient_i64<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| serde::de::Error::custom(format!("{} is not an integer", n))),
        serde_json::Value::String(s) => s.trim().parse().map_err(serde::de::Error::custom),
        serde_json::Value::Null => Ok(0),
        other => Err(serde::de::Error::custom(format!(
            "expected integer, got {}",
            other
        ))),
    }
}

/// Upstream sends booleans either as `true`/`false` or as `0`/`1`.
fn flag<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Bool(b) => Ok(b),
        serde_json::Value::Number(n) => Ok(n.as_i64().unwrap_or(0) != 0),
        serde_json::Value::Null => Ok(false),
        other => Err(serde::de::Error::custom(format!(
            "expected boolean, got {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payload() -> serde_json::Value {
        serde_json::json!({
            "squadron": {
                "id": 68879,
                "name": "Northern Lights",
                "tag": "NRTH",
                "ownerName": hex::encode("Cmdr Aurora"),
                "ownerId": 1234567,
                "platform": "PC",
                "created": "2021-10-05 12:00:00",
                "created_ts": 1633435200,
                "acceptingNewMembers": true,
                "powerId": null,
                "powerName": null,
                "superpowerId": 2,
                "superpowerName": "Federation",
                "factionId": 77,
                "factionName": "Aurora Collective",
                "userTags": [32, 5, 11],
                "memberCount": 12,
                "pendingCount": 1,
                "full": 0,
                "publicComms": 1,
                "publicCommsOverride": false,
                "publicCommsAvailable": true,
                "current_season_trade_score": 10,
                "previous_season_trade_score": 100,
                "current_season_combat_score": 20,
                "previous_season_combat_score": 200,
                "current_season_exploration_score": 30,
                "previous_season_exploration_score": 300,
                "current_season_cqc_score": 0,
                "previous_season_cqc_score": 0,
                "current_season_bgs_score": 5,
                "previous_season_bgs_score": 50,
                "current_season_powerplay_score": 0,
                "previous_season_powerplay_score": 0,
                "current_season_aegis_score": 1,
                "previous_season_aegis_score": 2
            }
        })
    }

    #[test]
    fn test_deserialize_info_payload() {
        let envelope: InfoEnvelope = serde_json::from_value(sample_payload()).unwrap();
        let info = envelope.squadron;

        assert_eq!(info.id, 68879);
        assert_eq!(info.owner_id, "1234567");
        assert_eq!(info.user_tags, vec![32, 5, 11]);
        assert!(info.accepting_new_members);
        assert!(!info.full);
        assert!(info.public_comms);
        assert_eq!(info.power_id, None);
        assert_eq!(info.superpower_name.as_deref(), Some("Federation"));
        assert_eq!(info.motd, "");
    }

    #[test]
    fn test_normalize_decodes_owner_name() {
        let envelope: InfoEnvelope = serde_json::from_value(sample_payload()).unwrap();
        let info = envelope.squadron.normalize();
        assert_eq!(info.owner_name, "Cmdr Aurora");
    }

    #[test]
    fn test_normalize_keeps_undecodable_owner_name() {
        let mut payload = sample_payload();
        payload["squadron"]["ownerName"] = serde_json::json!("not hex at all");
        let envelope: InfoEnvelope = serde_json::from_value(payload).unwrap();
        let info = envelope.squadron.normalize();
        assert_eq!(info.owner_name, "not hex at all");
    }

    #[test]
    fn test_season_sums() {
        let envelope: InfoEnvelope = serde_json::from_value(sample_payload()).unwrap();
        let scores = &envelope.squadron.scores;
        assert_eq!(scores.current_sum(), 66);
        assert_eq!(scores.previous_sum(), 652);
    }

    #[test]
    fn test_user_tags_json_keeps_order() {
        let envelope: InfoEnvelope = serde_json::from_value(sample_payload()).unwrap();
        assert_eq!(envelope.squadron.user_tags_json(), "[32,5,11]");
    }

    #[test]
    fn test_decode_hex_text_rejects_invalid_utf8() {
        let err = decode_hex_text("ff").unwrap_err();
        assert!(matches!(err, Error::InvalidField { field: "ownerName", .. }));
    }

    #[test]
    fn test_snapshot_accessors() {
        let tombstone = Snapshot {
            snapshot_id: 1,
            squadron_id: 5,
            observed_at: Utc::now(),
            state: SquadronState::Tombstoned,
        };
        assert!(tombstone.is_tombstone());
        assert!(tombstone.info().is_none());
    }
}
