//! Snapshot store: append-only squadron history in SQLite.
//!
//! Every observation of a squadron becomes a new row; nothing is updated or
//! deleted. The latest row for an id decides whether the squadron is live or
//! tombstoned.
//!
//! # Usage
//!
//! ```ignore
//! use squadwatch_sync::store::SnapshotStore;
//!
//! let store = SnapshotStore::open("./data/squads.sqlite".as_ref())?;
//! let next = store.first_gap()?;
//! if store.is_tombstoned(next)? {
//!     // known dead, never ask upstream again
//! }
//! ```

mod schema;

use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde_json::Value;
use squadwatch_core::{NewsFeed, SeasonScores, Snapshot, SquadronInfo, SquadronState};

pub use schema::{SCHEMA_VERSION, TOMBSTONE_PREDICATE};

use crate::Result;

const SNAPSHOT_COLUMNS: &str = "snapshot_id, squadron_id, name, tag, owner_name, owner_id, \
     platform, created, created_ts, accepting_new_members, power_id, power_name, superpower_id, \
     superpower_name, faction_id, faction_name, user_tags, member_count, pending_count, full, \
     public_comms, public_comms_override, public_comms_available, motd, \
     current_season_trade_score, previous_season_trade_score, \
     current_season_combat_score, previous_season_combat_score, \
     current_season_exploration_score, previous_season_exploration_score, \
     current_season_cqc_score, previous_season_cqc_score, \
     current_season_bgs_score, previous_season_bgs_score, \
     current_season_powerplay_score, previous_season_powerplay_score, \
     current_season_aegis_score, previous_season_aegis_score, observed_at";

/// SQLite-backed squadron history.
pub struct SnapshotStore {
    /// SQLite connection (protected by mutex for thread safety).
    conn: Mutex<Connection>,
}

impl SnapshotStore {
    /// Open or create a store at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        schema::init_schema(&conn)?;

        tracing::info!("Opened snapshot store at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Current state of a squadron, if it was ever observed.
    pub fn latest(&self, squadron_id: i64) -> Result<Option<Snapshot>> {
        let conn = self.conn.lock();
        let snapshot = conn
            .query_row(
                &format!(
                    "SELECT {} FROM squadron_snapshots WHERE squadron_id = ?
                     ORDER BY snapshot_id DESC LIMIT 1",
                    SNAPSHOT_COLUMNS
                ),
                [squadron_id],
                row_to_snapshot,
            )
            .optional()?;
        Ok(snapshot)
    }

    /// Most recent snapshots for a squadron, newest first.
    pub fn history(&self, squadron_id: i64, limit: usize) -> Result<Vec<Snapshot>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM squadron_snapshots WHERE squadron_id = ?
             ORDER BY snapshot_id DESC LIMIT ?",
            SNAPSHOT_COLUMNS
        ))?;
        let snapshots = stmt
            .query_map(params![squadron_id, limit as i64], row_to_snapshot)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(snapshots)
    }

    /// Whether the latest row for the squadron is a tombstone.
    pub fn is_tombstoned(&self, squadron_id: i64) -> Result<bool> {
        let conn = self.conn.lock();
        latest_is_tombstone(&conn, squadron_id)
    }

    /// Whether any live (non-tombstone) row exists for the squadron.
    pub fn has_live_snapshot(&self, squadron_id: i64) -> Result<bool> {
        let conn = self.conn.lock();
        let exists: bool = conn.query_row(
            &format!(
                "SELECT EXISTS(SELECT 1 FROM squadron_snapshots
                 WHERE squadron_id = ? AND NOT ({}))",
                TOMBSTONE_PREDICATE
            ),
            [squadron_id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Number of rows (live and tombstone) stored for the squadron.
    pub fn snapshot_count(&self, squadron_id: i64) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM squadron_snapshots WHERE squadron_id = ?",
            [squadron_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Append a live snapshot.
    pub fn insert_snapshot(
        &self,
        info: &SquadronInfo,
        observed_at: DateTime<Utc>,
    ) -> Result<Snapshot> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let s = &info.scores;

        tx.execute(
            "INSERT INTO squadron_snapshots (
                squadron_id, name, tag, owner_name, owner_id, platform, created, created_ts,
                accepting_new_members, power_id, power_name, superpower_id, superpower_name,
                faction_id, faction_name, user_tags, member_count, pending_count, full,
                public_comms, public_comms_override, public_comms_available, motd,
                current_season_trade_score, previous_season_trade_score,
                current_season_combat_score, previous_season_combat_score,
                current_season_exploration_score, previous_season_exploration_score,
                current_season_cqc_score, previous_season_cqc_score,
                current_season_bgs_score, previous_season_bgs_score,
                current_season_powerplay_score, previous_season_powerplay_score,
                current_season_aegis_score, previous_season_aegis_score,
                observed_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?,
                     ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                info.id,
                info.name,
                info.tag,
                info.owner_name,
                info.owner_id,
                info.platform,
                info.created,
                info.created_ts,
                info.accepting_new_members,
                info.power_id,
                info.power_name,
                info.superpower_id,
                info.superpower_name,
                info.faction_id,
                info.faction_name,
                info.user_tags_json(),
                info.member_count,
                info.pending_count,
                info.full,
                info.public_comms,
                info.public_comms_override,
                info.public_comms_available,
                info.motd,
                s.current_season_trade_score,
                s.previous_season_trade_score,
                s.current_season_combat_score,
                s.previous_season_combat_score,
                s.current_season_exploration_score,
                s.previous_season_exploration_score,
                s.current_season_cqc_score,
                s.previous_season_cqc_score,
                s.current_season_bgs_score,
                s.previous_season_bgs_score,
                s.current_season_powerplay_score,
                s.previous_season_powerplay_score,
                s.current_season_aegis_score,
                s.previous_season_aegis_score,
                observed_at.timestamp_millis(),
            ],
        )?;
        let snapshot_id = tx.last_insert_rowid();
        tx.commit()?;

        Ok(Snapshot {
            snapshot_id,
            squadron_id: info.id,
            observed_at,
            state: SquadronState::Live(Box::new(info.clone())),
        })
    }

    /// Append a tombstone unless the squadron is already tombstoned.
    ///
    /// Returns whether a row was written.
    pub fn tombstone(&self, squadron_id: i64, observed_at: DateTime<Utc>) -> Result<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        if latest_is_tombstone(&tx, squadron_id)? {
            return Ok(false);
        }

        tx.execute(
            "INSERT INTO squadron_snapshots (squadron_id, observed_at) VALUES (?, ?)",
            params![squadron_id, observed_at.timestamp_millis()],
        )?;
        tx.commit()?;

        tracing::debug!(squadron_id, "Wrote tombstone");
        Ok(true)
    }

    /// Append every entry of a news feed. Returns the number of rows written.
    pub fn insert_news(
        &self,
        squadron_id: i64,
        feed: &NewsFeed,
        inserted_at: DateTime<Utc>,
    ) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut count = 0usize;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO news (squadron_id, bucket, news_id, date, category, activity,
                    season, bookmark, motd, author, cmdr_id, user_id, inserted_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )?;

            for (bucket, entries) in &feed.buckets {
                for entry in entries {
                    stmt.execute(params![
                        squadron_id,
                        bucket,
                        json_to_sql(&entry.id),
                        json_to_sql(&entry.date),
                        json_to_sql(&entry.category),
                        json_to_sql(&entry.activity),
                        json_to_sql(&entry.season),
                        json_to_sql(&entry.bookmark),
                        json_to_sql(&entry.motd),
                        json_to_sql(&entry.author),
                        json_to_sql(&entry.cmdr_id),
                        json_to_sql(&entry.user_id),
                        inserted_at.timestamp_millis(),
                    ])?;
                    count += 1;
                }
            }
        }

        tx.commit()?;
        Ok(count)
    }

    /// Number of news rows stored for the squadron.
    pub fn news_count(&self, squadron_id: i64) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM news WHERE squadron_id = ?",
            [squadron_id],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// First id missing from the known-id sequence starting at 1.
    ///
    /// With rows for {1, 2, 4, 5} this is 3; with no rows at all it is 1.
    pub fn first_gap(&self) -> Result<i64> {
        let conn = self.conn.lock();
        let gap: i64 = conn.query_row(
            "SELECT CASE
                WHEN NOT EXISTS (SELECT 1 FROM squadron_snapshots WHERE squadron_id = 1) THEN 1
                ELSE (
                    SELECT MIN(s.squadron_id) + 1
                    FROM squadron_snapshots s
                    WHERE NOT EXISTS (
                        SELECT 1 FROM squadron_snapshots n
                        WHERE n.squadron_id = s.squadron_id + 1
                    )
                )
             END",
            [],
            |row| row.get(0),
        )?;
        tracing::debug!("First gap in known ids: {}", gap);
        Ok(gap)
    }

    /// Highest squadron id present in the store.
    pub fn max_known_id(&self) -> Result<Option<i64>> {
        let conn = self.conn.lock();
        let max: Option<i64> = conn.query_row(
            "SELECT MAX(squadron_id) FROM squadron_snapshots",
            [],
            |row| row.get(0),
        )?;
        Ok(max)
    }

    /// Live squadrons ordered by how long ago they were last observed.
    ///
    /// With `observed_before`, only squadrons whose latest observation is
    /// strictly older than that instant are returned.
    pub fn stale_squadrons(
        &self,
        limit: usize,
        observed_before: Option<DateTime<Utc>>,
    ) -> Result<Vec<i64>> {
        let conn = self.conn.lock();
        let cutoff = observed_before.map_or(i64::MAX, |t| t.timestamp_millis());

        let mut stmt = conn.prepare(&format!(
            "SELECT squadron_id FROM latest_snapshots
             WHERE NOT ({}) AND observed_at < ?
             ORDER BY observed_at ASC, squadron_id ASC
             LIMIT ?",
            TOMBSTONE_PREDICATE
        ))?;
        let ids = stmt
            .query_map(params![cutoff, limit as i64], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<i64>>>()?;
        Ok(ids)
    }
}

fn latest_is_tombstone(conn: &Connection, squadron_id: i64) -> Result<bool> {
    let tombstone: Option<bool> = conn
        .query_row(
            &format!(
                "SELECT {} FROM squadron_snapshots WHERE squadron_id = ?
                 ORDER BY snapshot_id DESC LIMIT 1",
                TOMBSTONE_PREDICATE
            ),
            [squadron_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(tombstone.unwrap_or(false))
}

fn row_to_snapshot(row: &Row<'_>) -> rusqlite::Result<Snapshot> {
    let snapshot_id: i64 = row.get("snapshot_id")?;
    let squadron_id: i64 = row.get("squadron_id")?;
    let observed_at_ms: i64 = row.get("observed_at")?;
    let observed_at = DateTime::from_timestamp_millis(observed_at_ms).unwrap_or_default();

    let tag: Option<String> = row.get("tag")?;
    let state = match tag {
        None => SquadronState::Tombstoned,
        Some(tag) => {
            let user_tags: Option<String> = row.get("user_tags")?;
            let user_tags = user_tags
                .as_deref()
                .and_then(|raw| serde_json::from_str(raw).ok())
                .unwrap_or_default();

            let info = SquadronInfo {
                id: squadron_id,
                name: row.get::<_, Option<String>>("name")?.unwrap_or_default(),
                tag,
                owner_name: row.get::<_, Option<String>>("owner_name")?.unwrap_or_default(),
                owner_id: row.get::<_, Option<String>>("owner_id")?.unwrap_or_default(),
                platform: row.get::<_, Option<String>>("platform")?.unwrap_or_default(),
                created: row.get::<_, Option<String>>("created")?.unwrap_or_default(),
                created_ts: int(row, "created_ts")?,
                accepting_new_members: flag(row, "accepting_new_members")?,
                power_id: row.get("power_id")?,
                power_name: row.get("power_name")?,
                superpower_id: row.get("superpower_id")?,
                superpower_name: row.get("superpower_name")?,
                faction_id: row.get("faction_id")?,
                faction_name: row.get("faction_name")?,
                user_tags,
                member_count: int(row, "member_count")?,
                pending_count: int(row, "pending_count")?,
                full: flag(row, "full")?,
                public_comms: flag(row, "public_comms")?,
                public_comms_override: flag(row, "public_comms_override")?,
                public_comms_available: flag(row, "public_comms_available")?,
                scores: SeasonScores {
                    current_season_trade_score: int(row, "current_season_trade_score")?,
                    previous_season_trade_score: int(row, "previous_season_trade_score")?,
                    current_season_combat_score: int(row, "current_season_combat_score")?,
                    previous_season_combat_score: int(row, "previous_season_combat_score")?,
                    current_season_exploration_score: int(row, "current_season_exploration_score")?,
                    previous_season_exploration_score: int(
                        row,
                        "previous_season_exploration_score",
                    )?,
                    current_season_cqc_score: int(row, "current_season_cqc_score")?,
                    previous_season_cqc_score: int(row, "previous_season_cqc_score")?,
                    current_season_bgs_score: int(row, "current_season_bgs_score")?,
                    previous_season_bgs_score: int(row, "previous_season_bgs_score")?,
                    current_season_powerplay_score: int(row, "current_season_powerplay_score")?,
                    previous_season_powerplay_score: int(row, "previous_season_powerplay_score")?,
                    current_season_aegis_score: int(row, "current_season_aegis_score")?,
                    previous_season_aegis_score: int(row, "previous_season_aegis_score")?,
                },
                motd: row.get::<_, Option<String>>("motd")?.unwrap_or_default(),
            };
            SquadronState::Live(Box::new(info))
        }
    };

    Ok(Snapshot {
        snapshot_id,
        squadron_id,
        observed_at,
        state,
    })
}

fn int(row: &Row<'_>, column: &str) -> rusqlite::Result<i64> {
    Ok(row.get::<_, Option<i64>>(column)?.unwrap_or(0))
}

fn flag(row: &Row<'_>, column: &str) -> rusqlite::Result<bool> {
    Ok(row.get::<_, Option<bool>>(column)?.unwrap_or(false))
}

/// Store a loosely typed news field in its natural SQLite type.
fn json_to_sql(value: &Option<Value>) -> rusqlite::types::Value {
    use rusqlite::types::Value as Sql;

    match value {
        None | Some(Value::Null) => Sql::Null,
        Some(Value::String(s)) => Sql::Text(s.clone()),
        Some(Value::Bool(b)) => Sql::Integer(i64::from(*b)),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(i) => Sql::Integer(i),
            None => n.as_f64().map_or(Sql::Null, Sql::Real),
        },
        Some(other) => Sql::Text(other.to_string()),
    }
}
