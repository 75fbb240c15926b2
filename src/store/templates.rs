//! `task_templates` table access.
//!
//! Functions take a borrowed connection and are meant to run inside a
//! [`super::PersistenceQueue`] job.

use rusqlite::{Connection, OptionalExtension, params};

use crate::catalog::TaskTemplate;
use crate::engine::TaskSnapshot;
use crate::error::Result;

/// What an import changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub inserted: Vec<String>,
    pub updated: Vec<String>,
    pub unchanged: Vec<String>,
}

/// All enabled templates.
pub fn load_enabled(conn: &Connection) -> Result<Vec<TaskTemplate>> {
    let mut stmt =
        conn.prepare("SELECT task_key, version, task_data FROM task_templates WHERE enabled = 1")?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, u32>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;
    let mut out = Vec::new();
    for row in rows {
        let (key, version, data) = row?;
        out.push(decode(&key, version, &data)?);
    }
    Ok(out)
}

/// `(key, version)` of every enabled template. Cheap enough for frequent sync.
pub fn load_versions(conn: &Connection) -> Result<Vec<(String, u32)>> {
    let mut stmt = conn.prepare("SELECT task_key, version FROM task_templates WHERE enabled = 1")?;
    let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Full records for the given keys; disabled or missing keys are skipped.
pub fn load_by_keys(conn: &Connection, keys: &[String]) -> Result<Vec<TaskTemplate>> {
    let mut stmt = conn.prepare(
        "SELECT version, task_data FROM task_templates WHERE task_key = ?1 AND enabled = 1",
    )?;
    let mut out = Vec::with_capacity(keys.len());
    for key in keys {
        let row = stmt
            .query_row(params![key], |row| {
                Ok((row.get::<_, u32>(0)?, row.get::<_, String>(1)?))
            })
            .optional()?;
        if let Some((version, data)) = row {
            out.push(decode(key, version, &data)?);
        }
    }
    Ok(out)
}

/// Upsert templates in one transaction.
///
/// A template whose content changed gets `stored version + 1` (or its own
/// version if higher); identical content keeps its version. Every imported
/// key is (re)enabled.
pub fn import(conn: &mut Connection, templates: &[TaskTemplate]) -> Result<ImportReport> {
    let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
    let mut report = ImportReport::default();
    for template in templates {
        let existing = tx
            .query_row(
                "SELECT version, task_data FROM task_templates WHERE task_key = ?1",
                params![template.key],
                |row| Ok((row.get::<_, u32>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;

        let (version, bucket) = match existing {
            None => (template.version.max(1), &mut report.inserted),
            Some((stored_version, data)) => {
                let stored = decode(&template.key, stored_version, &data)?;
                if stored.same_content(template) {
                    (stored_version, &mut report.unchanged)
                } else {
                    (
                        template.version.max(stored_version + 1),
                        &mut report.updated,
                    )
                }
            }
        };

        let mut stamped = template.clone();
        stamped.version = version;
        let data = TaskSnapshot::capture(&stamped).to_json()?;
        tx.execute(
            "INSERT INTO task_templates (task_key, version, task_data, enabled)
             VALUES (?1, ?2, ?3, 1)
             ON CONFLICT(task_key) DO UPDATE SET
                 version = excluded.version,
                 task_data = excluded.task_data,
                 enabled = 1",
            params![stamped.key, version, data],
        )?;
        bucket.push(stamped.key);
    }
    tx.commit()?;
    Ok(report)
}

/// Soft delete. Returns `false` if no enabled template had that key.
pub fn disable(conn: &Connection, key: &str) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE task_templates SET enabled = 0 WHERE task_key = ?1 AND enabled = 1",
        params![key],
    )?;
    Ok(changed == 1)
}

fn decode(key: &str, version: u32, data: &str) -> Result<TaskTemplate> {
    let mut template = TaskSnapshot::from_json(data)?.template;
    template.key = key.to_owned();
    template.version = version;
    Ok(template)
}
