//! SQLite DDL for the task store.
//!
//! All `CREATE TABLE` / `CREATE INDEX` statements live here so they are
//! reviewable and testable in isolation.

use rusqlite::Connection;

/// Version stamped into `schema_meta` for a fresh database.
pub(crate) const CURRENT_SCHEMA_VERSION: u32 = 1;

/// Complete DDL for the task store.
///
/// Uses `IF NOT EXISTS` throughout so `apply_schema` is idempotent. Several
/// server processes may open the same file, so the schema never drops or
/// rewrites existing tables.
pub(crate) const SCHEMA_SQL: &str = r#"
-- Enable WAL mode so readers in other processes are not blocked by the writer.
PRAGMA journal_mode = WAL;

-- Schema version tracking.
CREATE TABLE IF NOT EXISTS schema_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Authoritative template catalog. Soft-deleted rows keep enabled = 0.
CREATE TABLE IF NOT EXISTS task_templates (
    task_key  TEXT PRIMARY KEY,
    version   INTEGER NOT NULL DEFAULT 1,
    task_data TEXT NOT NULL,            -- JSON TaskSnapshot
    enabled   INTEGER NOT NULL DEFAULT 1
);

-- Live assignments. Composite key, no surrogate id.
CREATE TABLE IF NOT EXISTS active_tasks (
    player_id        TEXT NOT NULL,
    task_key         TEXT NOT NULL,
    assigned_at      INTEGER NOT NULL,  -- epoch seconds
    category         TEXT NOT NULL DEFAULT 'daily',
    task_version     INTEGER NOT NULL DEFAULT 1,
    current_progress INTEGER NOT NULL DEFAULT 0,
    completed        INTEGER NOT NULL DEFAULT 0,
    claimed          INTEGER NOT NULL DEFAULT 0,
    task_data        TEXT NOT NULL,     -- JSON TaskSnapshot frozen at assignment
    PRIMARY KEY (player_id, task_key, assigned_at)
);

CREATE INDEX IF NOT EXISTS idx_active_player_category ON active_tasks(player_id, category);
CREATE INDEX IF NOT EXISTS idx_active_assigned_at     ON active_tasks(assigned_at);

-- Per-player reroll quota, one row per category.
CREATE TABLE IF NOT EXISTS reroll_quota (
    player_id       TEXT NOT NULL,
    category_id     TEXT NOT NULL,
    reroll_count    INTEGER NOT NULL DEFAULT 0,
    last_reset_time INTEGER NOT NULL,   -- epoch seconds
    PRIMARY KEY (player_id, category_id)
);
"#;

/// Apply the full schema to an open connection.
///
/// Safe to call multiple times. Seeds the schema version on a fresh
/// database and leaves an existing stamp alone.
pub(crate) fn apply_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    let version_str = CURRENT_SCHEMA_VERSION.to_string();
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', ?1)",
        rusqlite::params![version_str],
    )?;

    Ok(())
}

/// Read the current schema version from the database.
///
/// Returns `None` if the `schema_meta` table is empty or the key is missing.
pub(crate) fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<u32>> {
    let mut stmt = conn.prepare("SELECT value FROM schema_meta WHERE key = 'schema_version'")?;
    let mut rows = stmt.query([])?;
    match rows.next()? {
        Some(row) => {
            let val: String = row.get(0)?;
            Ok(val.parse::<u32>().ok())
        }
        None => Ok(None),
    }
}
