//! Paid rerolls arbitrated by the store-side quota.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use rusqlite::{Connection, TransactionBehavior};
use tracing::{error, info};
use uuid::Uuid;

use super::Core;
use super::collab::Notification;
use super::generator::TaskGenerator;
use super::lifecycle::fill_slots;
use super::task::{ActiveTask, TaskId};
use crate::catalog::TaskCatalog;
use crate::error::{Result, TaskError};
use crate::policy::CategoryPolicy;
use crate::store::{quota, tasks};

/// How much of the current set a reroll replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RerollMode {
    /// Keep completed and claimed tasks, replace the rest.
    Partial,
    /// Replace everything.
    Force,
    /// Admin reroll: replace everything, no cost and no quota.
    Full,
}

impl RerollMode {
    /// Player-facing mode for a category.
    pub fn for_policy(policy: &CategoryPolicy) -> Self {
        if policy.reroll.keep_completed {
            Self::Partial
        } else {
            Self::Force
        }
    }

    fn is_admin(self) -> bool {
        self == Self::Full
    }
}

impl fmt::Display for RerollMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Partial => "partial",
            Self::Force => "force",
            Self::Full => "full",
        })
    }
}

/// What a committed reroll did.
#[derive(Debug)]
pub struct RerollOutcome {
    pub mode: RerollMode,
    pub kept: usize,
    pub removed: usize,
    pub generated: usize,
    /// Amount withdrawn after commit; zero for free and admin rerolls.
    pub charged: f64,
    pub tasks: Vec<Arc<ActiveTask>>,
}

struct RerollJob {
    player: Uuid,
    mode: RerollMode,
    policy: Arc<CategoryPolicy>,
    catalog: Arc<TaskCatalog>,
    generator: Arc<TaskGenerator>,
    now: DateTime<Utc>,
    zone: FixedOffset,
}

struct Committed {
    kept: Vec<ActiveTask>,
    removed: usize,
    fresh: Vec<ActiveTask>,
}

impl RerollJob {
    /// Quota claim, deletes and inserts share one transaction; any error
    /// rolls all of them back.
    fn run(&self, conn: &mut Connection) -> Result<Committed> {
        let policy = &self.policy;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let current = tasks::load_for_category(&tx, self.player, &policy.id)?;
        // Only a partial reroll steers away from the keys held before it.
        let excluded: HashSet<String> = match self.mode {
            RerollMode::Partial => current.iter().map(|t| t.key().to_owned()).collect(),
            RerollMode::Force | RerollMode::Full => HashSet::new(),
        };

        let (kept, replaced): (Vec<_>, Vec<_>) = match self.mode {
            RerollMode::Partial => current.into_iter().partition(ActiveTask::is_settled),
            RerollMode::Force | RerollMode::Full => (Vec::new(), current),
        };
        if kept.len() >= policy.max_concurrent {
            return Err(TaskError::NothingToReroll(policy.id.clone()));
        }

        if !self.mode.is_admin()
            && !quota::claim(&tx, self.player, policy, self.now, &self.zone)?
        {
            return Err(TaskError::QuotaExceeded {
                category: policy.id.clone(),
                max: policy.reroll.max_per_cycle,
            });
        }

        let replaced_ids: Vec<TaskId> = replaced.iter().map(|t| t.id().clone()).collect();
        let removed = tasks::delete_all(&tx, &replaced_ids)?;

        let fill = fill_slots(
            self.player,
            policy,
            &self.catalog,
            &self.generator,
            &excluded,
            policy.max_concurrent - kept.len(),
            self.now,
        )?;
        tasks::insert_all(&tx, &fill.rows)?;
        tx.commit()?;

        Ok(Committed {
            kept,
            removed,
            fresh: fill.tasks,
        })
    }
}

/// Reroll execution and quota administration.
pub struct RerollQuotaManager {
    core: Arc<Core>,
}

impl RerollQuotaManager {
    pub(crate) fn new(core: Arc<Core>) -> Self {
        Self { core }
    }

    /// Replace the player's tasks in `category`.
    ///
    /// Player modes check the category switch, the balance and the quota.
    /// Money is withdrawn only after the store committed. A partial reroll
    /// never reuses a key the player held before it; force and full rerolls
    /// draw from the whole pool.
    pub async fn reroll(
        &self,
        player: Uuid,
        category: &str,
        mode: RerollMode,
    ) -> Result<RerollOutcome> {
        let policy = self.core.categories.get(category)?;
        if !policy.enabled {
            return Err(TaskError::Disabled(format!("category '{category}'")));
        }

        let cost = if mode.is_admin() {
            0.0
        } else {
            if !policy.reroll.enabled {
                return Err(TaskError::Disabled(format!("reroll in category '{category}'")));
            }
            policy.reroll.cost
        };
        if cost > 0.0 {
            let balance = self.core.economy.balance(player);
            if balance < cost {
                return Err(TaskError::InsufficientFunds {
                    required: cost,
                    balance,
                });
            }
        }

        let job = RerollJob {
            player,
            mode,
            policy: Arc::clone(&policy),
            catalog: Arc::clone(&self.core.catalog),
            generator: Arc::clone(&self.core.generator),
            now: self.core.now(),
            zone: self.core.zone,
        };
        let committed = self
            .core
            .queue
            .execute("reroll", move |conn| job.run(conn))
            .await?;

        let charged = if cost > 0.0 {
            if self.core.economy.withdraw(player, cost) {
                cost
            } else {
                error!(
                    player = %player,
                    category = %policy.id,
                    cost,
                    "reroll committed but withdrawal failed"
                );
                0.0
            }
        } else {
            0.0
        };

        let kept = committed.kept.len();
        let generated = committed.fresh.len();
        let tasks: Vec<Arc<ActiveTask>> = committed
            .kept
            .into_iter()
            .chain(committed.fresh)
            .map(Arc::new)
            .collect();
        self.core
            .cache
            .replace_category(player, &policy.id, tasks.clone());
        self.core.cache.clear_category_complete(player, &policy.id);

        info!(
            player = %player,
            category = %policy.id,
            %mode,
            kept,
            removed = committed.removed,
            generated,
            charged,
            "tasks rerolled"
        );
        self.core.notifications.notify(
            player,
            Notification::Rerolled {
                category: policy.id.clone(),
                kept,
                generated,
            },
        );

        Ok(RerollOutcome {
            mode,
            kept,
            removed: committed.removed,
            generated,
            charged,
            tasks,
        })
    }

    /// Rerolls left this cycle, after any pending reset.
    pub async fn remaining(&self, player: Uuid, category: &str) -> Result<u32> {
        let policy = self.core.categories.get(category)?;
        let now = self.core.now();
        let zone = self.core.zone;
        let max = policy.reroll.max_per_cycle;
        let used = self
            .core
            .queue
            .execute("remaining_rerolls", move |conn| {
                quota::used_this_cycle(conn, player, &policy, now, &zone)
            })
            .await?;
        Ok(max.saturating_sub(used))
    }

    /// Admin: give one player a full quota again.
    pub async fn reset_quota(&self, player: Uuid, category: &str) -> Result<()> {
        let policy = self.core.categories.get(category)?;
        let now = self.core.now();
        let category_id = policy.id.clone();
        self.core
            .queue
            .execute("reset_reroll_quota", move |conn| {
                quota::reset(conn, player, &category_id, now)
            })
            .await?;
        info!(player = %player, category = %policy.id, "reroll quota reset");
        Ok(())
    }

    /// Admin: reset every player's quota, optionally for one category only.
    pub async fn reset_all_quotas(&self, category: Option<&str>) -> Result<usize> {
        let category_id = match category {
            Some(id) => Some(self.core.categories.get(id)?.id.clone()),
            None => None,
        };
        let now = self.core.now();
        let scope = category_id.clone();
        let reset = self
            .core
            .queue
            .execute("reset_all_reroll_quotas", move |conn| {
                quota::reset_all(conn, scope.as_deref(), now)
            })
            .await?;
        info!(
            category = category_id.as_deref().unwrap_or("*"),
            rows = reset,
            "reroll quotas reset"
        );
        Ok(reset)
    }
}
