//! Expiry, regeneration and manual assignment of active tasks.
//!
//! Every decision is taken on the queue thread against freshly loaded rows,
//! inside one immediate transaction, so the store never sees a category
//! with its expired tasks deleted but no replacements inserted.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, TimeDelta, Utc};
use rusqlite::{Connection, TransactionBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::Core;
use super::cache::PlayerTasks;
use super::collab::Notification;
use super::generator::TaskGenerator;
use super::task::{ActiveTask, TaskId};
use crate::catalog::TaskCatalog;
use crate::error::{Result, TaskError};
use crate::policy::CategoryPolicy;
use crate::store::{quota, tasks};

/// Result of refreshing one category for one player.
#[derive(Debug, Default)]
pub struct RefreshOutcome {
    /// Tasks the player holds afterwards, kept ones first.
    pub tasks: Vec<Arc<ActiveTask>>,
    pub expired: usize,
    pub generated: usize,
}

impl RefreshOutcome {
    pub fn changed(&self) -> bool {
        self.expired > 0 || self.generated > 0
    }
}

/// Rows removed by a retention pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RetentionReport {
    pub tasks: usize,
    pub quotas: usize,
}

/// Tasks drawn for empty slots, ready to insert.
pub(crate) struct Fill {
    pub tasks: Vec<ActiveTask>,
    pub rows: Vec<tasks::NewTaskRow>,
}

/// Draw up to `wanted` templates for `policy` and stamp them `now`.
///
/// Logs a warning when the pool cannot cover every slot.
pub(crate) fn fill_slots(
    player: Uuid,
    policy: &CategoryPolicy,
    catalog: &TaskCatalog,
    generator: &TaskGenerator,
    held: &HashSet<String>,
    wanted: usize,
    now: DateTime<Utc>,
) -> Result<Fill> {
    if wanted == 0 {
        return Ok(Fill {
            tasks: Vec::new(),
            rows: Vec::new(),
        });
    }
    let picked = generator.generate(catalog, &policy.id, held, wanted);
    if picked.len() < wanted {
        warn!(
            player = %player,
            category = %policy.id,
            wanted,
            available = picked.len(),
            "template pool too small to fill every slot"
        );
    }
    let assigned: Vec<ActiveTask> = picked
        .into_iter()
        .map(|template| ActiveTask::assign(player, template, &policy.id, now))
        .collect();
    let rows = assigned
        .iter()
        .map(tasks::NewTaskRow::from_task)
        .collect::<Result<Vec<_>>>()?;
    Ok(Fill {
        tasks: assigned,
        rows,
    })
}

struct RefreshJob {
    player: Uuid,
    policy: Arc<CategoryPolicy>,
    catalog: Arc<TaskCatalog>,
    generator: Arc<TaskGenerator>,
    now: DateTime<Utc>,
    zone: FixedOffset,
}

impl RefreshJob {
    fn run(&self, conn: &mut Connection) -> Result<RefreshOutcome> {
        let policy = &self.policy;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current = tasks::load_for_category(&tx, self.player, &policy.id)?;
        let (expired, kept): (Vec<_>, Vec<_>) = current
            .into_iter()
            .partition(|t| policy.is_task_expired(t.assigned_at(), self.now, &self.zone));

        let expired_ids: Vec<TaskId> = expired.iter().map(|t| t.id().clone()).collect();
        tasks::delete_all(&tx, &expired_ids)?;

        let open_slots = if policy.auto_assign && policy.accepts_generation(self.now) {
            policy.max_concurrent.saturating_sub(kept.len())
        } else {
            0
        };
        let held: HashSet<String> = kept.iter().map(|t| t.key().to_owned()).collect();
        let fill = fill_slots(
            self.player,
            policy,
            &self.catalog,
            &self.generator,
            &held,
            open_slots,
            self.now,
        )?;
        tasks::insert_all(&tx, &fill.rows)?;
        tx.commit()?;

        let generated = fill.tasks.len();
        Ok(RefreshOutcome {
            tasks: kept.into_iter().chain(fill.tasks).map(Arc::new).collect(),
            expired: expired_ids.len(),
            generated,
        })
    }
}

/// Drives expiry and regeneration for cached players.
pub struct LifecycleManager {
    core: Arc<Core>,
}

impl LifecycleManager {
    pub(crate) fn new(core: Arc<Core>) -> Self {
        Self { core }
    }

    async fn refresh_in_store(
        &self,
        player: Uuid,
        policy: Arc<CategoryPolicy>,
    ) -> Result<RefreshOutcome> {
        let job = RefreshJob {
            player,
            policy,
            catalog: Arc::clone(&self.core.catalog),
            generator: Arc::clone(&self.core.generator),
            now: self.core.now(),
            zone: self.core.zone,
        };
        self.core
            .queue
            .execute("refresh_category", move |conn| job.run(conn))
            .await
    }

    /// Refresh one category and swap it into the cache.
    pub async fn refresh_category(&self, player: Uuid, category: &str) -> Result<RefreshOutcome> {
        let policy = self.core.categories.get(category)?;
        if !policy.enabled {
            return Err(TaskError::Disabled(format!("category '{category}'")));
        }
        let outcome = self.refresh_in_store(player, Arc::clone(&policy)).await?;
        self.core
            .cache
            .replace_category(player, &policy.id, outcome.tasks.clone());
        if outcome.changed() {
            self.core.cache.clear_category_complete(player, &policy.id);
        }
        Ok(outcome)
    }

    /// Load a player: refresh every enabled category and cache the result
    /// in one swap.
    ///
    /// A category that fails keeps its previous cached list. Sends one
    /// [`Notification::Refreshed`] naming the categories that changed.
    /// Returns those display names.
    pub async fn refresh_all(&self, player: Uuid) -> Vec<String> {
        self.refresh_player(player, true).await
    }

    /// Refresh a player. With `load` unset the result is only cached, and
    /// announced, if the player is still cached when the store work ends.
    async fn refresh_player(&self, player: Uuid, load: bool) -> Vec<String> {
        let previous = self.core.cache.player(player);
        let mut next = PlayerTasks::new();
        let mut changed = Vec::new();

        let policies: Vec<_> = self.core.categories.enabled().cloned().collect();
        for policy in policies {
            match self.refresh_in_store(player, Arc::clone(&policy)).await {
                Ok(outcome) => {
                    if outcome.changed() {
                        debug!(
                            player = %player,
                            category = %policy.id,
                            expired = outcome.expired,
                            generated = outcome.generated,
                            "category refreshed"
                        );
                        self.core.cache.clear_category_complete(player, &policy.id);
                        changed.push(policy.display_name.clone());
                    }
                    next.insert(policy.id.clone(), outcome.tasks);
                }
                Err(e) => {
                    warn!(player = %player, category = %policy.id, error = %e, "category refresh failed");
                    if let Some(old) = previous.as_ref().and_then(|p| p.get(&policy.id)) {
                        next.insert(policy.id.clone(), old.clone());
                    }
                }
            }
        }
        if load {
            self.core.cache.insert_player(player, next);
        } else if !self.core.cache.replace_player(player, next) {
            debug!(player = %player, "player left during refresh");
            return Vec::new();
        }

        if !changed.is_empty() {
            self.core.notifications.notify(
                player,
                Notification::Refreshed {
                    categories: changed.clone(),
                },
            );
        }
        changed
    }

    /// Refresh every cached player. Returns how many had changes.
    pub async fn sweep_online(&self) -> usize {
        let players = self.core.cache.players();
        let mut touched = 0;
        for player in &players {
            if !self.refresh_player(*player, false).await.is_empty() {
                touched += 1;
            }
        }
        if touched > 0 {
            info!(online = players.len(), refreshed = touched, "expiry sweep finished");
        } else {
            debug!(online = players.len(), "expiry sweep found nothing");
        }
        touched
    }

    /// Hand a specific template to a player, ignoring the cap.
    ///
    /// Fails with [`TaskError::Validation`] if the player already holds the
    /// key in that category.
    pub async fn assign_task(
        &self,
        player: Uuid,
        category: &str,
        task_key: &str,
    ) -> Result<Arc<ActiveTask>> {
        let policy = self.core.categories.get(category)?;
        if !policy.enabled {
            return Err(TaskError::Disabled(format!("category '{category}'")));
        }
        let template = self
            .core
            .catalog
            .get(task_key)
            .ok_or_else(|| TaskError::NotFound(format!("template '{task_key}'")))?;

        let task = ActiveTask::assign(player, template, &policy.id, self.core.now());
        let row = tasks::NewTaskRow::from_task(&task)?;
        let category_id = policy.id.clone();
        let key = task_key.to_owned();
        let reloaded = self
            .core
            .queue
            .execute("assign_task", move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                if tasks::holds_key(&tx, player, &category_id, &key)? {
                    return Err(TaskError::Validation(format!(
                        "player already holds '{key}' in '{category_id}'"
                    )));
                }
                tasks::insert_all(&tx, std::slice::from_ref(&row))?;
                let all = tasks::load_for_category(&tx, player, &category_id)?;
                tx.commit()?;
                Ok(all)
            })
            .await?;

        let reloaded: Vec<Arc<ActiveTask>> = reloaded.into_iter().map(Arc::new).collect();
        let assigned = reloaded
            .iter()
            .find(|t| t.id() == task.id())
            .cloned()
            .unwrap_or_else(|| Arc::new(task));
        self.core.cache.replace_category(player, &policy.id, reloaded);
        self.core.cache.clear_category_complete(player, &policy.id);

        info!(player = %player, category = %policy.id, task = task_key, "task assigned");
        self.core.notifications.notify(
            player,
            Notification::Assigned {
                category: policy.id.clone(),
                task_key: task_key.to_owned(),
            },
        );
        Ok(assigned)
    }

    /// Remove every task with `task_key` from the player's category.
    pub async fn remove_task(&self, player: Uuid, category: &str, task_key: &str) -> Result<usize> {
        let policy = self.core.categories.get(category)?;
        let category_id = policy.id.clone();
        let key = task_key.to_owned();
        let (removed, remaining) = self
            .core
            .queue
            .execute("remove_task", move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let removed = tasks::delete_by_key(&tx, player, &category_id, &key)?;
                let remaining = tasks::load_for_category(&tx, player, &category_id)?;
                tx.commit()?;
                Ok((removed, remaining))
            })
            .await?;
        if removed == 0 {
            return Err(TaskError::NotFound(format!(
                "task '{task_key}' in category '{category}'"
            )));
        }
        self.core.cache.replace_category(
            player,
            &policy.id,
            remaining.into_iter().map(Arc::new).collect(),
        );
        info!(player = %player, category = %policy.id, task = task_key, removed, "task removed");
        Ok(removed)
    }

    /// Delete rows older than `retention_days` in periodic categories, and
    /// quota rows untouched for twice that long. Zero disables the pass.
    ///
    /// A row is only removed once its own category policy also considers it
    /// expired, so long relative windows outlive the retention window.
    pub async fn cleanup_retained(&self, retention_days: u32) -> Result<RetentionReport> {
        if retention_days == 0 {
            return Ok(RetentionReport::default());
        }
        let now = self.core.now();
        let zone = self.core.zone;
        let window = TimeDelta::days(i64::from(retention_days));
        let task_cutoff = now - window;
        let quota_cutoff = now - window * 2;
        let periodic: Vec<Arc<CategoryPolicy>> = self
            .core
            .categories
            .all()
            .iter()
            .filter(|p| p.expire.is_periodic())
            .cloned()
            .collect();

        let (deleted, quotas) = self
            .core
            .queue
            .execute("cleanup_retained", move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let mut stale: Vec<TaskId> = Vec::new();
                for policy in &periodic {
                    stale.extend(
                        tasks::load_assigned_before(&tx, &policy.id, task_cutoff)?
                            .into_iter()
                            .filter(|t| policy.is_task_expired(t.assigned_at(), now, &zone))
                            .map(|t| t.id().clone()),
                    );
                }
                tasks::delete_all(&tx, &stale)?;
                let quotas = quota::delete_reset_before(&tx, quota_cutoff)?;
                tx.commit()?;
                Ok((stale, quotas))
            })
            .await?;
        self.core.cache.forget_tasks(&deleted);

        let report = RetentionReport {
            tasks: deleted.len(),
            quotas,
        };
        if report.tasks > 0 || report.quotas > 0 {
            info!(
                tasks = report.tasks,
                quotas = report.quotas,
                retention_days,
                "retention cleanup removed stale rows"
            );
        }
        Ok(report)
    }
}
