//! Immutable per-category rules.
//!
//! A category carries two independent [`PeriodPolicy`] instances: one for
//! when assigned tasks expire and one for when the reroll quota resets.
//! They are never conflated; a weekly task category can still reset its
//! reroll count daily.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};

use crate::clock::PeriodPolicy;
use crate::config::CategoryConfig;
use crate::error::{Result, TaskError};

/// Runtime rules for one task category.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryPolicy {
    pub id: String,
    pub display_name: String,
    pub enabled: bool,
    /// Maximum active tasks per player.
    pub max_concurrent: usize,
    pub auto_assign: bool,
    pub auto_claim: bool,
    /// Expiration of assigned tasks.
    pub expire: PeriodPolicy,
    /// Reroll rules, including their own reset policy.
    pub reroll: RerollPolicy,
}

/// Reroll rules for a category.
#[derive(Debug, Clone, PartialEq)]
pub struct RerollPolicy {
    pub enabled: bool,
    pub cost: f64,
    pub max_per_cycle: u32,
    pub keep_completed: bool,
    /// When `reroll_count` goes back to zero.
    pub reset: PeriodPolicy,
}

impl CategoryPolicy {
    /// Validate a config block into a runtime policy.
    pub fn from_config(config: &CategoryConfig) -> Result<Self> {
        let id = config.id.trim();
        if id.is_empty() {
            return Err(TaskError::Config("category id must not be empty".into()));
        }
        if config.max_concurrent == 0 {
            return Err(TaskError::Config(format!(
                "category '{id}' has max_concurrent = 0"
            )));
        }
        if !config.reroll.cost.is_finite() || config.reroll.cost < 0.0 {
            return Err(TaskError::Config(format!(
                "category '{id}' has invalid reroll cost {}",
                config.reroll.cost
            )));
        }
        Ok(Self {
            id: id.to_owned(),
            display_name: config
                .display_name
                .clone()
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| id.to_owned()),
            enabled: config.enabled,
            max_concurrent: config.max_concurrent,
            auto_assign: config.auto_assign,
            auto_claim: config.auto_claim,
            expire: config.expire.to_policy()?,
            reroll: RerollPolicy {
                enabled: config.reroll.enabled,
                cost: config.reroll.cost,
                max_per_cycle: config.reroll.max_count,
                keep_completed: config.reroll.keep_completed,
                reset: config.reroll.reset.to_policy()?,
            },
        })
    }

    /// Whether a task assigned at `assigned_at` is stale.
    pub fn is_task_expired(
        &self,
        assigned_at: DateTime<Utc>,
        now: DateTime<Utc>,
        zone: &FixedOffset,
    ) -> bool {
        self.expire.is_expired(assigned_at, now, zone)
    }

    /// Whether new tasks may be generated right now.
    ///
    /// Only fixed-window categories can refuse.
    pub fn accepts_generation(&self, now: DateTime<Utc>) -> bool {
        self.expire.in_fixed_window(now)
    }

    /// Whether the reroll quota stamped at `last_reset` needs resetting.
    pub fn is_quota_stale(
        &self,
        last_reset: DateTime<Utc>,
        now: DateTime<Utc>,
        zone: &FixedOffset,
    ) -> bool {
        self.reroll.reset.is_expired(last_reset, now, zone)
    }
}

/// Lookup of configured categories, in configuration order.
#[derive(Debug, Clone, Default)]
pub struct CategorySet {
    order: Vec<Arc<CategoryPolicy>>,
    by_id: HashMap<String, Arc<CategoryPolicy>>,
}

impl CategorySet {
    pub fn new(policies: Vec<CategoryPolicy>) -> Self {
        let order: Vec<Arc<CategoryPolicy>> = policies.into_iter().map(Arc::new).collect();
        let by_id = order
            .iter()
            .map(|p| (p.id.clone(), Arc::clone(p)))
            .collect();
        Self { order, by_id }
    }

    /// Category by id, or [`TaskError::Validation`] when unknown.
    pub fn get(&self, id: &str) -> Result<Arc<CategoryPolicy>> {
        self.by_id
            .get(id)
            .cloned()
            .ok_or_else(|| TaskError::Validation(format!("unknown category '{id}'")))
    }

    /// Enabled categories in configuration order.
    pub fn enabled(&self) -> impl Iterator<Item = &Arc<CategoryPolicy>> {
        self.order.iter().filter(|p| p.enabled)
    }

    pub fn all(&self) -> &[Arc<CategoryPolicy>] {
        &self.order
    }
}
