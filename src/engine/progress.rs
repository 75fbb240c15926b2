//! Event matching, batched progress commits and completion handling.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::Core;
use super::collab::Notification;
use super::task::{ActiveTask, TaskId};
use crate::catalog::TaskKind;
use crate::clock::truncate_to_secs;
use crate::error::{Result, TaskError};
use crate::store::tasks::{self, ProgressDelta};

/// Percent thresholds that raise a milestone notification.
const MILESTONES: [u32; 3] = [75, 50, 25];

/// A game event that may advance tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub kind: TaskKind,
    /// Block id, item key, entity type, chat text or command line.
    pub selector: String,
    pub amount: u32,
    /// Extra context checked by template conditions.
    pub detail: Option<String>,
}

impl ProgressEvent {
    pub fn new(kind: TaskKind, selector: impl Into<String>, amount: u32) -> Self {
        Self {
            kind,
            selector: selector.into(),
            amount,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// What one event did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProgressReport {
    /// Tasks the event matched in the cache.
    pub matched: usize,
    /// Tasks whose increment the store confirmed.
    pub advanced: usize,
    /// Tasks this event completed.
    pub completed: Vec<TaskId>,
}

/// Highest milestone crossed going from `before` to `after` percent.
///
/// 100% is left to the completion notification.
pub fn crossed_milestone(before: u32, after: u32) -> Option<u32> {
    MILESTONES
        .into_iter()
        .find(|m| before < *m && *m <= after && after < 100)
}

pub struct ProgressTracker {
    core: Arc<Core>,
}

impl ProgressTracker {
    pub(crate) fn new(core: Arc<Core>) -> Self {
        Self { core }
    }

    fn matching(&self, player: Uuid, event: &ProgressEvent, now: DateTime<Utc>) -> Vec<Arc<ActiveTask>> {
        let Some(cached) = self.core.cache.player(player) else {
            return Vec::new();
        };
        let mut matched = Vec::new();
        for (category, tasks) in cached.iter() {
            let Ok(policy) = self.core.categories.get(category) else {
                continue;
            };
            if !policy.enabled {
                continue;
            }
            matched.extend(
                tasks
                    .iter()
                    .filter(|t| !t.is_completed())
                    .filter(|t| !policy.is_task_expired(t.assigned_at(), now, &self.core.zone))
                    .filter(|t| {
                        t.template()
                            .accepts(event.kind, &event.selector, event.detail.as_deref())
                    })
                    .cloned(),
            );
        }
        matched
    }

    /// Apply `event` to every matching cached task of `player`.
    ///
    /// Increments are committed in one batch; only rows the store confirmed
    /// touch the cache or raise notifications.
    pub async fn report(&self, player: Uuid, event: &ProgressEvent) -> Result<ProgressReport> {
        if event.amount == 0 {
            return Ok(ProgressReport::default());
        }
        let now = self.core.now();
        let matched = self.matching(player, event, now);
        if matched.is_empty() {
            return Ok(ProgressReport::default());
        }

        let deltas: Vec<ProgressDelta> = matched
            .iter()
            .map(|t| ProgressDelta {
                id: t.id().clone(),
                amount: event.amount,
                target: t.target(),
            })
            .collect();
        let confirmed = self
            .core
            .queue
            .execute("apply_progress", move |conn| {
                tasks::apply_progress(conn, &deltas)
            })
            .await?;

        let mut report = ProgressReport {
            matched: matched.len(),
            ..ProgressReport::default()
        };
        let mut finished_categories = BTreeSet::new();

        for (task, row) in matched.iter().zip(confirmed) {
            let Some(row) = row else {
                debug!(task = %task.id(), "progress not applied, row gone or already complete");
                continue;
            };
            report.advanced += 1;
            let before = task.raise_progress(row.progress);

            if row.completed {
                if task.try_complete() {
                    report.completed.push(task.id().clone());
                    finished_categories.insert(task.category().to_owned());
                    self.on_completed(task).await;
                }
                continue;
            }
            if let Some(percent) =
                crossed_milestone(task.percent_of(before), task.percent_of(row.progress))
            {
                self.core.notifications.notify(
                    player,
                    Notification::Milestone {
                        category: task.category().to_owned(),
                        task_key: task.key().to_owned(),
                        percent,
                    },
                );
            }
        }

        for category in finished_categories {
            let tasks = self.core.cache.category(player, &category);
            let all_done = !tasks.is_empty() && tasks.iter().all(|t| t.is_completed());
            if all_done && self.core.cache.mark_category_complete(player, &category) {
                self.core
                    .notifications
                    .notify(player, Notification::CategoryComplete { category });
            }
        }
        Ok(report)
    }

    async fn on_completed(&self, task: &Arc<ActiveTask>) {
        let player = task.player();
        let auto_claim = self
            .core
            .categories
            .get(task.category())
            .map(|p| p.auto_claim)
            .unwrap_or(false);
        info!(player = %player, category = task.category(), task = task.key(), "task completed");

        if auto_claim {
            match self.claim_in_store(task).await {
                Ok(()) => return,
                Err(e) => {
                    warn!(task = %task.id(), error = %e, "auto-claim failed, leaving task claimable");
                }
            }
        }
        self.core.notifications.notify(
            player,
            Notification::Completed {
                category: task.category().to_owned(),
                task_key: task.key().to_owned(),
            },
        );
    }

    /// Conditional claim in the store, then cache flag, reward and notice.
    async fn claim_in_store(&self, task: &Arc<ActiveTask>) -> Result<()> {
        let id = task.id().clone();
        let claimed = self
            .core
            .queue
            .execute("claim_reward", move |conn| tasks::mark_claimed(conn, &id))
            .await?;
        if !claimed {
            return Err(TaskError::ConcurrencyConflict(format!(
                "task {} was not claimable in the store",
                task.id()
            )));
        }
        if task.try_claim() {
            let player = task.player();
            self.core.rewards.grant(player, &task.template().reward);
            self.core.notifications.notify(
                player,
                Notification::RewardClaimed {
                    category: task.category().to_owned(),
                    task_key: task.key().to_owned(),
                },
            );
        }
        Ok(())
    }

    /// Claim the reward of a completed task.
    ///
    /// Falls back to the store when the player is not cached.
    pub async fn claim_reward(
        &self,
        player: Uuid,
        task_key: &str,
        assigned_at: DateTime<Utc>,
    ) -> Result<Arc<ActiveTask>> {
        let id = TaskId {
            player,
            task_key: task_key.to_owned(),
            assigned_at: truncate_to_secs(assigned_at),
        };
        let task = match self.core.cache.find(&id) {
            Some(task) => task,
            None => {
                let wanted = id.clone();
                self.core
                    .queue
                    .execute("load_task", move |conn| {
                        let all = tasks::load_for_player(conn, player)?;
                        Ok(all.into_iter().find(|t| *t.id() == wanted))
                    })
                    .await?
                    .map(Arc::new)
                    .ok_or_else(|| TaskError::NotFound(format!("task {id}")))?
            }
        };
        if !task.is_completed() {
            return Err(TaskError::Validation(format!("task {id} is not completed")));
        }
        if task.is_claimed() {
            return Err(TaskError::Validation(format!("task {id} is already claimed")));
        }
        self.claim_in_store(&task).await?;
        Ok(task)
    }
}
