//! `active_tasks` table access.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params};
use tracing::warn;
use uuid::Uuid;

use crate::engine::{ActiveTask, TaskId, TaskSnapshot};
use crate::error::{Result, TaskError};

const SELECT_COLUMNS: &str = "SELECT player_id, task_key, assigned_at, category, task_version, \
     current_progress, completed, claimed, task_data FROM active_tasks";

/// One row to insert.
#[derive(Debug, Clone)]
pub struct NewTaskRow {
    pub id: TaskId,
    pub category: String,
    pub task_version: u32,
    pub task_data: String,
}

impl NewTaskRow {
    pub fn from_task(task: &ActiveTask) -> Result<Self> {
        Ok(Self {
            id: task.id().clone(),
            category: task.category().to_owned(),
            task_version: task.template_version(),
            task_data: task.snapshot().to_json()?,
        })
    }
}

/// Progress increment for one matched task.
#[derive(Debug, Clone)]
pub struct ProgressDelta {
    pub id: TaskId,
    pub amount: u32,
    pub target: u32,
}

/// Row state the store accepted for a [`ProgressDelta`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmedProgress {
    pub progress: u32,
    pub completed: bool,
}

/// Active tasks of one player in one category, oldest first.
pub fn load_for_category(
    conn: &Connection,
    player: Uuid,
    category: &str,
) -> Result<Vec<ActiveTask>> {
    let sql = format!(
        "{SELECT_COLUMNS} WHERE player_id = ?1 AND category = ?2 ORDER BY assigned_at, task_key"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![player.to_string(), category], read_row)?;
    collect_rows(rows)
}

/// Every active task of one player.
pub fn load_for_player(conn: &Connection, player: Uuid) -> Result<Vec<ActiveTask>> {
    let sql = format!("{SELECT_COLUMNS} WHERE player_id = ?1 ORDER BY assigned_at, task_key");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![player.to_string()], read_row)?;
    collect_rows(rows)
}

/// Whether the player already holds `task_key` in `category`.
pub fn holds_key(conn: &Connection, player: Uuid, category: &str, task_key: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM active_tasks WHERE player_id = ?1 AND category = ?2 AND task_key = ?3",
        params![player.to_string(), category, task_key],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Insert rows. Run inside the caller's transaction.
pub fn insert_all(conn: &Connection, rows: &[NewTaskRow]) -> Result<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO active_tasks
             (player_id, task_key, assigned_at, category, task_version,
              current_progress, completed, claimed, task_data)
         VALUES (?1, ?2, ?3, ?4, ?5, 0, 0, 0, ?6)",
    )?;
    for row in rows {
        stmt.execute(params![
            row.id.player.to_string(),
            row.id.task_key,
            row.id.assigned_at.timestamp(),
            row.category,
            row.task_version,
            row.task_data,
        ])?;
    }
    Ok(())
}

/// Delete by composite key. Returns how many rows were removed.
pub fn delete_all(conn: &Connection, ids: &[TaskId]) -> Result<usize> {
    let mut stmt = conn.prepare(
        "DELETE FROM active_tasks WHERE player_id = ?1 AND task_key = ?2 AND assigned_at = ?3",
    )?;
    let mut removed = 0;
    for id in ids {
        removed += stmt.execute(params![
            id.player.to_string(),
            id.task_key,
            id.assigned_at.timestamp()
        ])?;
    }
    Ok(removed)
}

/// Delete every task of `player` in `category` with the given key.
pub fn delete_by_key(conn: &Connection, player: Uuid, category: &str, task_key: &str) -> Result<usize> {
    Ok(conn.execute(
        "DELETE FROM active_tasks WHERE player_id = ?1 AND category = ?2 AND task_key = ?3",
        params![player.to_string(), category, task_key],
    )?)
}

/// Apply progress increments in one transaction.
///
/// The increment happens in SQL (`MIN(current + amount, target)`) so no
/// writer can lose another's update. Each row is confirmed individually:
/// `None` means the row was gone or already completed and must be left
/// alone in the cache.
pub fn apply_progress(
    conn: &mut Connection,
    deltas: &[ProgressDelta],
) -> Result<Vec<Option<ConfirmedProgress>>> {
    let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
    let mut confirmed = Vec::with_capacity(deltas.len());
    {
        let mut stmt = tx.prepare(
            "UPDATE active_tasks
                SET current_progress = MIN(current_progress + ?1, ?2),
                    completed = CASE WHEN MIN(current_progress + ?1, ?2) >= ?2
                                     THEN 1 ELSE completed END
              WHERE player_id = ?3 AND task_key = ?4 AND assigned_at = ?5 AND completed = 0
              RETURNING current_progress, completed",
        )?;
        for delta in deltas {
            let mut rows = stmt.query(params![
                delta.amount,
                delta.target,
                delta.id.player.to_string(),
                delta.id.task_key,
                delta.id.assigned_at.timestamp(),
            ])?;
            let row = match rows.next()? {
                Some(row) => Some(ConfirmedProgress {
                    progress: row.get(0)?,
                    completed: row.get(1)?,
                }),
                None => None,
            };
            confirmed.push(row);
        }
    }
    tx.commit()?;
    Ok(confirmed)
}

/// Mark a completed task claimed. `false` if it was not claimable.
pub fn mark_claimed(conn: &Connection, id: &TaskId) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE active_tasks SET claimed = 1
          WHERE player_id = ?1 AND task_key = ?2 AND assigned_at = ?3
            AND completed = 1 AND claimed = 0",
        params![
            id.player.to_string(),
            id.task_key,
            id.assigned_at.timestamp()
        ],
    )?;
    Ok(changed == 1)
}

/// Rows in `category` assigned before `cutoff`, every player.
pub fn load_assigned_before(
    conn: &Connection,
    category: &str,
    cutoff: DateTime<Utc>,
) -> Result<Vec<ActiveTask>> {
    let sql = format!(
        "{SELECT_COLUMNS} WHERE category = ?1 AND assigned_at < ?2 ORDER BY assigned_at, task_key"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![category, cutoff.timestamp()], read_row)?;
    collect_rows(rows)
}

fn collect_rows(
    rows: impl Iterator<Item = rusqlite::Result<Result<ActiveTask>>>,
) -> Result<Vec<ActiveTask>> {
    let mut out = Vec::new();
    for row in rows {
        match row? {
            Ok(task) => out.push(task),
            // A row we cannot decode is skipped, not fatal for the whole player.
            Err(e) => warn!(error = %e, "skipping undecodable task row"),
        }
    }
    Ok(out)
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<Result<ActiveTask>> {
    let player: String = row.get(0)?;
    let task_key: String = row.get(1)?;
    let assigned_at: i64 = row.get(2)?;
    let category: String = row.get(3)?;
    let task_version: u32 = row.get(4)?;
    let progress: u32 = row.get(5)?;
    let completed: bool = row.get(6)?;
    let claimed: bool = row.get(7)?;
    let data: String = row.get(8)?;

    Ok(decode_row(
        &player,
        task_key,
        assigned_at,
        category,
        task_version,
        progress,
        completed,
        claimed,
        &data,
    ))
}

#[allow(clippy::too_many_arguments)]
fn decode_row(
    player: &str,
    task_key: String,
    assigned_at: i64,
    category: String,
    task_version: u32,
    progress: u32,
    completed: bool,
    claimed: bool,
    data: &str,
) -> Result<ActiveTask> {
    let player = Uuid::parse_str(player)
        .map_err(|e| TaskError::Validation(format!("bad player id '{player}': {e}")))?;
    let assigned_at = DateTime::from_timestamp(assigned_at, 0)
        .ok_or_else(|| TaskError::Validation(format!("bad assigned_at {assigned_at}")))?;
    let snapshot = TaskSnapshot::from_json(data)?;
    Ok(ActiveTask::restore(
        TaskId {
            player,
            task_key,
            assigned_at,
        },
        category,
        task_version,
        snapshot.template,
        progress,
        completed,
        claimed,
    ))
}
