//! Boundaries to the host: rewards, money and player notifications.
//!
//! The engine only calls these after the store has confirmed a change.
//! Implementations must not block for long; they run on the engine
//! caller's task.

use uuid::Uuid;

use crate::catalog::Reward;

/// Pays out a reward spec.
pub trait RewardGranter: Send + Sync {
    fn grant(&self, player: Uuid, reward: &Reward);
}

/// Player balance, used for paid rerolls.
///
/// There is no two-phase commit with the task store, so the engine checks
/// `balance` before its transaction and calls `withdraw` only after commit.
pub trait Economy: Send + Sync {
    fn balance(&self, player: Uuid) -> f64;
    /// Returns `false` if the withdrawal was refused.
    fn withdraw(&self, player: Uuid, amount: f64) -> bool;
}

/// Receives player-facing events.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, player: Uuid, notification: Notification);
}

/// Player-facing event raised by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// A task was handed out manually.
    Assigned { category: String, task_key: String },
    /// A task reached its target and is waiting to be claimed.
    Completed { category: String, task_key: String },
    /// A reward was granted, either by claim or auto-claim.
    RewardClaimed { category: String, task_key: String },
    /// Progress crossed a 25/50/75% threshold.
    Milestone {
        category: String,
        task_key: String,
        percent: u32,
    },
    /// Every task in the category is completed.
    CategoryComplete { category: String },
    /// Expired tasks were replaced; carries the affected display names.
    Refreshed { categories: Vec<String> },
    /// A reroll finished.
    Rerolled {
        category: String,
        kept: usize,
        generated: usize,
    },
}

impl Notification {
    /// Stable machine-readable kind, e.g. for message-key lookup.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Assigned { .. } => "task-assigned",
            Self::Completed { .. } => "task-completed",
            Self::RewardClaimed { .. } => "reward-claimed",
            Self::Milestone { .. } => "task-milestone",
            Self::CategoryComplete { .. } => "category-complete",
            Self::Refreshed { .. } => "tasks-refreshed",
            Self::Rerolled { .. } => "tasks-rerolled",
        }
    }
}

/// Grants nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRewards;

impl RewardGranter for NoopRewards {
    fn grant(&self, _player: Uuid, _reward: &Reward) {}
}

/// Economy where everything is free and every withdrawal succeeds.
#[derive(Debug, Default, Clone, Copy)]
pub struct FreeEconomy;

impl Economy for FreeEconomy {
    fn balance(&self, _player: Uuid) -> f64 {
        f64::INFINITY
    }

    fn withdraw(&self, _player: Uuid, _amount: f64) -> bool {
        true
    }
}

/// Logs notifications at debug level and drops them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifications;

impl NotificationSink for LogNotifications {
    fn notify(&self, player: Uuid, notification: Notification) {
        tracing::debug!(player = %player, kind = notification.kind(), ?notification, "notification");
    }
}
