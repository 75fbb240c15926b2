//! A player's live task instance and its frozen template snapshot.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::catalog::TaskTemplate;
use crate::error::{Result, TaskError};

/// Current layout of the `task_data` blob.
pub const SNAPSHOT_SCHEMA_VERSION: u32 = 1;

/// Template frozen at assignment time, stored as JSON in `task_data`.
///
/// Later catalog edits never change a task that is already assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub schema_version: u32,
    pub template: TaskTemplate,
}

impl TaskSnapshot {
    pub fn capture(template: &TaskTemplate) -> Self {
        Self {
            schema_version: SNAPSHOT_SCHEMA_VERSION,
            template: template.clone(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a stored blob, upgrading older layouts.
    ///
    /// Version 0 is a bare template object with no envelope. Newer versions
    /// than this build understands are rejected.
    pub fn from_json(raw: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(raw)?;
        let version = value
            .get("schema_version")
            .and_then(serde_json::Value::as_u64)
            .unwrap_or(0);
        Self::upgrade(version, value)
    }

    fn upgrade(version: u64, value: serde_json::Value) -> Result<Self> {
        match version {
            0 => Ok(Self {
                schema_version: SNAPSHOT_SCHEMA_VERSION,
                template: serde_json::from_value(value)?,
            }),
            1 => Ok(serde_json::from_value(value)?),
            other => Err(TaskError::Validation(format!(
                "task snapshot schema {other} is newer than supported {SNAPSHOT_SCHEMA_VERSION}"
            ))),
        }
    }
}

/// Composite identity of an assignment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskId {
    pub player: Uuid,
    pub task_key: String,
    /// Whole seconds; see [`crate::clock::truncate_to_secs`].
    pub assigned_at: DateTime<Utc>,
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}@{}",
            self.player,
            self.task_key,
            self.assigned_at.timestamp()
        )
    }
}

/// A player's live copy of a template.
///
/// Progress and flags are atomics so event threads can race on the cached
/// instance without locks. `progress` never decreases, `completed` only goes
/// false to true, and `claimed` implies `completed`.
#[derive(Debug)]
pub struct ActiveTask {
    id: TaskId,
    category: String,
    template_version: u32,
    template: Arc<TaskTemplate>,
    progress: AtomicU32,
    completed: AtomicBool,
    claimed: AtomicBool,
}

impl ActiveTask {
    /// Fresh assignment with zero progress.
    pub fn assign(
        player: Uuid,
        template: Arc<TaskTemplate>,
        category: &str,
        assigned_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TaskId {
                player,
                task_key: template.key.clone(),
                assigned_at,
            },
            category: category.to_owned(),
            template_version: template.version,
            template,
            progress: AtomicU32::new(0),
            completed: AtomicBool::new(false),
            claimed: AtomicBool::new(false),
        }
    }

    /// Rebuild from a stored row. Flags are normalized to the invariants.
    pub fn restore(
        id: TaskId,
        category: String,
        template_version: u32,
        template: TaskTemplate,
        progress: u32,
        completed: bool,
        claimed: bool,
    ) -> Self {
        let progress = progress.min(template.target_amount);
        let completed = completed || progress >= template.target_amount;
        Self {
            id,
            category,
            template_version,
            template: Arc::new(template),
            progress: AtomicU32::new(progress),
            completed: AtomicBool::new(completed),
            claimed: AtomicBool::new(claimed && completed),
        }
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn key(&self) -> &str {
        &self.id.task_key
    }

    pub fn player(&self) -> Uuid {
        self.id.player
    }

    pub fn assigned_at(&self) -> DateTime<Utc> {
        self.id.assigned_at
    }

    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn template_version(&self) -> u32 {
        self.template_version
    }

    pub fn template(&self) -> &TaskTemplate {
        &self.template
    }

    pub fn target(&self) -> u32 {
        self.template.target_amount
    }

    pub fn progress(&self) -> u32 {
        self.progress.load(Ordering::Acquire)
    }

    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    pub fn is_claimed(&self) -> bool {
        self.claimed.load(Ordering::Acquire)
    }

    /// Completed or claimed tasks survive a keep-completed reroll.
    pub fn is_settled(&self) -> bool {
        self.is_completed() || self.is_claimed()
    }

    /// Percentage of target reached for a given progress value.
    pub fn percent_of(&self, progress: u32) -> u32 {
        let target = self.target().max(1);
        (u64::from(progress.min(target)) * 100 / u64::from(target)) as u32
    }

    /// Raise progress to at least `value` (clamped to target).
    ///
    /// Returns the value it replaced. Concurrent callers never lower it.
    pub fn raise_progress(&self, value: u32) -> u32 {
        self.progress
            .fetch_max(value.min(self.target()), Ordering::AcqRel)
    }

    /// Add `amount`, clamped to target, without losing concurrent increments.
    ///
    /// Returns `(previous, new)`.
    pub fn add_progress(&self, amount: u32) -> (u32, u32) {
        let target = self.target();
        let mut current = self.progress.load(Ordering::Acquire);
        loop {
            let next = current.saturating_add(amount).min(target);
            match self.progress.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return (current, next),
                Err(actual) => current = actual,
            }
        }
    }

    /// Flip `completed` once progress has reached target.
    ///
    /// Returns `true` only for the single caller that performed the flip.
    pub fn try_complete(&self) -> bool {
        if self.progress() < self.target() {
            return false;
        }
        self.completed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Flip `claimed` on a completed task. `true` only for the winner.
    pub fn try_claim(&self) -> bool {
        if !self.is_completed() {
            return false;
        }
        self.claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Snapshot blob for persistence.
    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot::capture(&self.template)
    }
}
