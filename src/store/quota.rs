//! `reroll_quota` table access.
//!
//! The conditional `UPDATE ... WHERE reroll_count < max` is the only arbiter
//! of the per-cycle limit. It holds across processes sharing the file; no
//! in-memory lock takes part.

use chrono::{DateTime, FixedOffset, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use uuid::Uuid;

use crate::error::{Result, TaskError};
use crate::policy::CategoryPolicy;

/// Stored quota state for one player and category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaRow {
    pub used: u32,
    pub last_reset: DateTime<Utc>,
}

/// Create the row if missing. Idempotent.
pub fn ensure_row(conn: &Connection, player: Uuid, category: &str, now: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO reroll_quota (player_id, category_id, reroll_count, last_reset_time)
         VALUES (?1, ?2, 0, ?3)",
        params![player.to_string(), category, now.timestamp()],
    )?;
    Ok(())
}

pub fn read(conn: &Connection, player: Uuid, category: &str) -> Result<Option<QuotaRow>> {
    let row = conn
        .query_row(
            "SELECT reroll_count, last_reset_time FROM reroll_quota
              WHERE player_id = ?1 AND category_id = ?2",
            params![player.to_string(), category],
            |row| Ok((row.get::<_, u32>(0)?, row.get::<_, i64>(1)?)),
        )
        .optional()?;
    row.map(|(used, stamp)| {
        DateTime::from_timestamp(stamp, 0)
            .map(|last_reset| QuotaRow { used, last_reset })
            .ok_or_else(|| TaskError::Validation(format!("bad last_reset_time {stamp}")))
    })
    .transpose()
}

/// Zero the count if the reroll policy says its cycle has passed.
///
/// Keyed on the old stamp, so when two processes race only one resets.
/// Returns `true` if this call performed the reset.
pub fn reset_if_stale(
    conn: &Connection,
    player: Uuid,
    policy: &CategoryPolicy,
    now: DateTime<Utc>,
    zone: &FixedOffset,
) -> Result<bool> {
    let Some(row) = read(conn, player, &policy.id)? else {
        return Ok(false);
    };
    if !policy.is_quota_stale(row.last_reset, now, zone) {
        return Ok(false);
    }
    let changed = conn.execute(
        "UPDATE reroll_quota SET reroll_count = 0, last_reset_time = ?1
          WHERE player_id = ?2 AND category_id = ?3 AND last_reset_time = ?4",
        params![
            now.timestamp(),
            player.to_string(),
            policy.id,
            row.last_reset.timestamp()
        ],
    )?;
    Ok(changed == 1)
}

/// Attempt to consume one credit. `true` iff the store granted it.
pub fn try_claim(conn: &Connection, player: Uuid, category: &str, max: u32) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE reroll_quota SET reroll_count = reroll_count + 1
          WHERE player_id = ?1 AND category_id = ?2 AND reroll_count < ?3",
        params![player.to_string(), category, max],
    )?;
    Ok(changed == 1)
}

/// Full claim protocol: ensure row, apply any pending reset, then claim.
pub fn claim(
    conn: &Connection,
    player: Uuid,
    policy: &CategoryPolicy,
    now: DateTime<Utc>,
    zone: &FixedOffset,
) -> Result<bool> {
    ensure_row(conn, player, &policy.id, now)?;
    reset_if_stale(conn, player, policy, now, zone)?;
    try_claim(conn, player, &policy.id, policy.reroll.max_per_cycle)
}

/// Credits used this cycle, after applying any pending reset.
pub fn used_this_cycle(
    conn: &Connection,
    player: Uuid,
    policy: &CategoryPolicy,
    now: DateTime<Utc>,
    zone: &FixedOffset,
) -> Result<u32> {
    reset_if_stale(conn, player, policy, now, zone)?;
    Ok(read(conn, player, &policy.id)?.map_or(0, |row| row.used))
}

/// Admin reset for one player.
pub fn reset(conn: &Connection, player: Uuid, category: &str, now: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "INSERT INTO reroll_quota (player_id, category_id, reroll_count, last_reset_time)
         VALUES (?1, ?2, 0, ?3)
         ON CONFLICT(player_id, category_id) DO UPDATE SET
             reroll_count = 0,
             last_reset_time = excluded.last_reset_time",
        params![player.to_string(), category, now.timestamp()],
    )?;
    Ok(())
}

/// Admin reset for every player, optionally limited to one category.
pub fn reset_all(conn: &Connection, category: Option<&str>, now: DateTime<Utc>) -> Result<usize> {
    let changed = match category {
        Some(category) => conn.execute(
            "UPDATE reroll_quota SET reroll_count = 0, last_reset_time = ?1 WHERE category_id = ?2",
            params![now.timestamp(), category],
        )?,
        None => conn.execute(
            "UPDATE reroll_quota SET reroll_count = 0, last_reset_time = ?1",
            params![now.timestamp()],
        )?,
    };
    Ok(changed)
}

/// Drop quota rows untouched since `cutoff`.
pub fn delete_reset_before(conn: &Connection, cutoff: DateTime<Utc>) -> Result<usize> {
    Ok(conn.execute(
        "DELETE FROM reroll_quota WHERE last_reset_time < ?1",
        params![cutoff.timestamp()],
    )?)
}
