//! SQLite task store and the single-writer queue in front of it.
//!
//! Table access lives in [`templates`], [`tasks`] and [`quota`] as plain
//! functions over a borrowed connection. Only the [`PersistenceQueue`]
//! thread calls them in production.

pub mod queue;
pub mod quota;
pub(crate) mod schema;
pub mod tasks;
pub mod templates;

use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;
use tracing::debug;

pub use queue::{
    Callback, CallbackDispatcher, CallbackPump, InlineDispatcher, PersistenceQueue, QueueOptions,
};
pub use templates::ImportReport;

use crate::error::{Result, TaskError};

/// Open (or create) the database file and apply the schema.
///
/// `busy_timeout` governs how long a write waits on a lock held by another
/// process sharing the file.
///
/// # Errors
///
/// Returns [`TaskError::Config`] if the file was stamped by a newer schema
/// than this build understands.
pub fn open_connection(path: &Path, busy_timeout: Duration) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;
    conn.busy_timeout(busy_timeout)?;
    schema::apply_schema(&conn)?;
    if let Some(found) = schema::read_schema_version(&conn)? {
        if found > schema::CURRENT_SCHEMA_VERSION {
            return Err(TaskError::Config(format!(
                "{} has schema version {found}, this build supports up to {}",
                path.display(),
                schema::CURRENT_SCHEMA_VERSION
            )));
        }
    }
    debug!(path = %path.display(), "task store opened");
    Ok(conn)
}

/// Schema version stamped in `schema_meta`.
pub fn schema_version(conn: &Connection) -> Result<Option<u32>> {
    Ok(schema::read_schema_version(conn)?)
}
