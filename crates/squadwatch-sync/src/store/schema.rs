//! SQLite schema for the snapshot store.
//!
//! Snapshots are append-only. A row whose attributes are all null is a
//! tombstone; the row with the highest `snapshot_id` for a squadron is its
//! current state.

use rusqlite::{Connection, Result};

/// Current schema version. Increment when making breaking changes.
pub const SCHEMA_VERSION: i32 = 1;

/// Predicate matching tombstone rows in `squadron_snapshots`.
pub const TOMBSTONE_PREDICATE: &str = "tag IS NULL";

/// Initialize the database schema.
///
/// Creates all tables if they don't exist.
pub fn init_schema(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version != SCHEMA_VERSION {
        tracing::warn!(
            "Snapshot store schema is version {}, this build expects {}",
            current_version,
            SCHEMA_VERSION
        );
    }

    Ok(())
}

/// Get the current schema version (0 if not initialized).
fn get_schema_version(conn: &Connection) -> Result<i32> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER NOT NULL
        )",
        [],
    )?;

    let version: Option<i32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .ok();

    Ok(version.unwrap_or(0))
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])?;
    Ok(())
}

fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- One row per observation; all attribute columns null = tombstone
        CREATE TABLE IF NOT EXISTS squadron_snapshots (
            snapshot_id INTEGER PRIMARY KEY AUTOINCREMENT,
            squadron_id INTEGER NOT NULL,
            name TEXT,
            tag TEXT,
            owner_name TEXT,
            owner_id TEXT,
            platform TEXT,
            created TEXT,
            created_ts INTEGER,
            accepting_new_members INTEGER,
            power_id INTEGER,
            power_name TEXT,
            superpower_id INTEGER,
            superpower_name TEXT,
            faction_id INTEGER,
            faction_name TEXT,
            user_tags TEXT,
            member_count INTEGER,
            pending_count INTEGER,
            full INTEGER,
            public_comms INTEGER,
            public_comms_override INTEGER,
            public_comms_available INTEGER,
            motd TEXT,
            current_season_trade_score INTEGER,
            previous_season_trade_score INTEGER,
            current_season_combat_score INTEGER,
            previous_season_combat_score INTEGER,
            current_season_exploration_score INTEGER,
            previous_season_exploration_score INTEGER,
            current_season_cqc_score INTEGER,
            previous_season_cqc_score INTEGER,
            current_season_bgs_score INTEGER,
            previous_season_bgs_score INTEGER,
            current_season_powerplay_score INTEGER,
            previous_season_powerplay_score INTEGER,
            current_season_aegis_score INTEGER,
            previous_season_aegis_score INTEGER,
            observed_at INTEGER NOT NULL
        );

        -- Upstream news, appended on every successful fetch
        CREATE TABLE IF NOT EXISTS news (
            squadron_id INTEGER NOT NULL,
            bucket TEXT NOT NULL,
            news_id,
            date,
            category,
            activity,
            season,
            bookmark,
            motd,
            author,
            cmdr_id,
            user_id,
            inserted_at INTEGER NOT NULL
        );

        -- Current state per squadron
        CREATE VIEW IF NOT EXISTS latest_snapshots AS
            SELECT s.*
            FROM squadron_snapshots s
            JOIN (
                SELECT squadron_id, MAX(snapshot_id) AS snapshot_id
                FROM squadron_snapshots
                GROUP BY squadron_id
            ) latest ON s.snapshot_id = latest.snapshot_id;

        CREATE INDEX IF NOT EXISTS idx_snapshots_squadron
            ON squadron_snapshots(squadron_id, snapshot_id);
        CREATE INDEX IF NOT EXISTS idx_snapshots_observed
            ON squadron_snapshots(observed_at);
        CREATE INDEX IF NOT EXISTS idx_news_squadron
            ON news(squadron_id, bucket);
        "#,
    )?;

    Ok(())
}
