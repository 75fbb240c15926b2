//! Task lifecycle engine.
//!
//! [`Engine`] wires the store, catalog, cache and managers together and is
//! the only surface a host needs. Build one with [`EngineBuilder`] or
//! [`Engine::open`].

pub mod cache;
pub mod collab;
pub mod generator;
pub mod lifecycle;
pub mod progress;
pub mod reroll;
pub mod task;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use tracing::info;
use uuid::Uuid;

pub use cache::{PlayerTaskCache, PlayerTasks};
pub use collab::{
    Economy, FreeEconomy, LogNotifications, NoopRewards, Notification, NotificationSink,
    RewardGranter,
};
pub use generator::{TaskGenerator, select_weighted};
pub use lifecycle::{LifecycleManager, RefreshOutcome, RetentionReport};
pub use progress::{ProgressEvent, ProgressReport, ProgressTracker};
pub use reroll::{RerollMode, RerollOutcome, RerollQuotaManager};
pub use task::{ActiveTask, SNAPSHOT_SCHEMA_VERSION, TaskId, TaskSnapshot};

use crate::catalog::{SyncReport, TaskCatalog, TaskTemplate};
use crate::clock::{Clock, SystemClock, truncate_to_secs};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::policy::{CategoryPolicy, CategorySet};
use crate::store::{
    self, CallbackDispatcher, CallbackPump, ImportReport, PersistenceQueue, QueueOptions, tasks,
};

/// Shared state handed to every manager.
pub(crate) struct Core {
    pub(crate) queue: Arc<PersistenceQueue>,
    pub(crate) catalog: Arc<TaskCatalog>,
    pub(crate) categories: CategorySet,
    pub(crate) cache: PlayerTaskCache,
    pub(crate) generator: Arc<TaskGenerator>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) zone: FixedOffset,
    pub(crate) rewards: Arc<dyn RewardGranter>,
    pub(crate) economy: Arc<dyn Economy>,
    pub(crate) notifications: Arc<dyn NotificationSink>,
}

impl Core {
    /// Current instant, truncated to the store's resolution.
    pub(crate) fn now(&self) -> DateTime<Utc> {
        truncate_to_secs(self.clock.now())
    }
}

/// Collects collaborators before the store is opened.
pub struct EngineBuilder {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    generator: TaskGenerator,
    rewards: Arc<dyn RewardGranter>,
    economy: Arc<dyn Economy>,
    notifications: Arc<dyn NotificationSink>,
    dispatcher: Option<Arc<dyn CallbackDispatcher>>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            clock: Arc::new(SystemClock),
            generator: TaskGenerator::new(),
            rewards: Arc::new(NoopRewards),
            economy: Arc::new(FreeEconomy),
            notifications: Arc::new(LogNotifications),
            dispatcher: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_generator(mut self, generator: TaskGenerator) -> Self {
        self.generator = generator;
        self
    }

    pub fn with_rewards(mut self, rewards: Arc<dyn RewardGranter>) -> Self {
        self.rewards = rewards;
        self
    }

    pub fn with_economy(mut self, economy: Arc<dyn Economy>) -> Self {
        self.economy = economy;
        self
    }

    pub fn with_notifications(mut self, notifications: Arc<dyn NotificationSink>) -> Self {
        self.notifications = notifications;
        self
    }

    /// Where queue callbacks run. Defaults to a [`CallbackPump`] the host
    /// drains through [`Engine::callback_pump`].
    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn CallbackDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Validate config, open the store, start the queue and load the catalog.
    pub async fn start(self) -> Result<Engine> {
        let categories = CategorySet::new(self.config.category_policies()?);
        let zone = self.config.zone()?;
        let db_path = self.config.database_path();
        let conn = store::open_connection(
            &db_path,
            Duration::from_millis(self.config.database.busy_timeout_ms),
        )?;

        let (dispatcher, pump) = match self.dispatcher {
            Some(dispatcher) => (dispatcher, None),
            None => {
                let pump = Arc::new(CallbackPump::new());
                (Arc::clone(&pump) as Arc<dyn CallbackDispatcher>, Some(pump))
            }
        };
        let queue = PersistenceQueue::start(conn, QueueOptions::from(&self.config.queue), dispatcher)?;

        let core = Arc::new(Core {
            queue: Arc::new(queue),
            catalog: Arc::new(TaskCatalog::new()),
            categories,
            cache: PlayerTaskCache::new(),
            generator: Arc::new(self.generator),
            clock: self.clock,
            zone,
            rewards: self.rewards,
            economy: self.economy,
            notifications: self.notifications,
        });
        core.catalog.reload(&core.queue).await?;

        info!(
            path = %db_path.display(),
            categories = core.categories.all().len(),
            templates = core.catalog.len(),
            zone = %zone,
            "task engine started"
        );

        Ok(Engine {
            lifecycle: LifecycleManager::new(Arc::clone(&core)),
            rerolls: RerollQuotaManager::new(Arc::clone(&core)),
            progress: ProgressTracker::new(Arc::clone(&core)),
            pump,
            core,
        })
    }
}

/// The task lifecycle engine.
pub struct Engine {
    core: Arc<Core>,
    lifecycle: LifecycleManager,
    rerolls: RerollQuotaManager,
    progress: ProgressTracker,
    pump: Option<Arc<CallbackPump>>,
}

impl Engine {
    /// Start with default collaborators.
    pub async fn open(config: EngineConfig) -> Result<Self> {
        EngineBuilder::new(config).start().await
    }

    /// Policy of a configured category.
    pub fn category(&self, id: &str) -> Result<Arc<CategoryPolicy>> {
        self.core.categories.get(id)
    }

    /// Every configured category, enabled or not.
    pub fn categories(&self) -> &[Arc<CategoryPolicy>] {
        self.core.categories.all()
    }

    pub fn queue(&self) -> &Arc<PersistenceQueue> {
        &self.core.queue
    }

    /// Pump for `submit` callbacks, unless a custom dispatcher was set.
    pub fn callback_pump(&self) -> Option<&Arc<CallbackPump>> {
        self.pump.as_ref()
    }

    pub fn catalog(&self) -> &TaskCatalog {
        &self.core.catalog
    }

    pub fn cache(&self) -> &PlayerTaskCache {
        &self.core.cache
    }

    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    pub fn rerolls(&self) -> &RerollQuotaManager {
        &self.rerolls
    }

    pub fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    // Players

    /// Load the player and refresh every category.
    ///
    /// Returns display names of categories that changed.
    pub async fn player_joined(&self, player: Uuid) -> Vec<String> {
        info!(player = %player, "player joined");
        self.lifecycle.refresh_all(player).await
    }

    /// Forget the player's cached tasks and notification flags.
    pub fn player_left(&self, player: Uuid) {
        self.core.cache.remove_player(player);
        info!(player = %player, "player left");
    }

    /// Tasks of `player` in `category`, from cache when loaded, else the store.
    pub async fn active_tasks(&self, player: Uuid, category: &str) -> Result<Vec<Arc<ActiveTask>>> {
        let policy = self.core.categories.get(category)?;
        if self.core.cache.contains(player) {
            return Ok(self.core.cache.category(player, &policy.id));
        }
        let category_id = policy.id.clone();
        let loaded = self
            .core
            .queue
            .execute("load_active_tasks", move |conn| {
                tasks::load_for_category(conn, player, &category_id)
            })
            .await?;
        Ok(loaded.into_iter().map(Arc::new).collect())
    }

    /// When the player's tasks in `category` next expire, for display.
    ///
    /// Relative policies count from the oldest held task.
    pub async fn next_reset(&self, player: Uuid, category: &str) -> Result<Option<DateTime<Utc>>> {
        let policy = self.core.categories.get(category)?;
        let now = self.core.now();
        let anchor = self
            .active_tasks(player, category)
            .await?
            .iter()
            .map(|t| t.assigned_at())
            .min()
            .unwrap_or(now);
        Ok(policy.expire.next_reset(anchor, now, &self.core.zone))
    }

    // Progress and rewards

    pub async fn report_progress(&self, player: Uuid, event: &ProgressEvent) -> Result<ProgressReport> {
        self.progress.report(player, event).await
    }

    pub async fn claim_reward(
        &self,
        player: Uuid,
        task_key: &str,
        assigned_at: DateTime<Utc>,
    ) -> Result<Arc<ActiveTask>> {
        self.progress.claim_reward(player, task_key, assigned_at).await
    }

    // Lifecycle

    pub async fn refresh_category(&self, player: Uuid, category: &str) -> Result<RefreshOutcome> {
        self.lifecycle.refresh_category(player, category).await
    }

    pub async fn assign_task(
        &self,
        player: Uuid,
        category: &str,
        task_key: &str,
    ) -> Result<Arc<ActiveTask>> {
        self.lifecycle.assign_task(player, category, task_key).await
    }

    pub async fn remove_task(&self, player: Uuid, category: &str, task_key: &str) -> Result<usize> {
        self.lifecycle.remove_task(player, category, task_key).await
    }

    /// Refresh every online player. Returns how many changed.
    pub async fn sweep(&self) -> usize {
        self.lifecycle.sweep_online().await
    }

    pub async fn cleanup_retained(&self, retention_days: u32) -> Result<RetentionReport> {
        self.lifecycle.cleanup_retained(retention_days).await
    }

    // Rerolls

    pub async fn reroll(&self, player: Uuid, category: &str, mode: RerollMode) -> Result<RerollOutcome> {
        self.rerolls.reroll(player, category, mode).await
    }

    pub async fn remaining_rerolls(&self, player: Uuid, category: &str) -> Result<u32> {
        self.rerolls.remaining(player, category).await
    }

    pub async fn reset_rerolls(&self, player: Uuid, category: &str) -> Result<()> {
        self.rerolls.reset_quota(player, category).await
    }

    pub async fn reset_all_rerolls(&self, category: Option<&str>) -> Result<usize> {
        self.rerolls.reset_all_quotas(category).await
    }

    // Templates

    pub async fn import_templates(&self, templates: Vec<TaskTemplate>) -> Result<ImportReport> {
        self.core.catalog.import(&self.core.queue, templates).await
    }

    pub async fn delete_template(&self, key: &str) -> Result<()> {
        self.core.catalog.delete(&self.core.queue, key).await
    }

    pub fn list_templates(&self) -> Vec<Arc<TaskTemplate>> {
        self.core.catalog.list()
    }

    pub async fn reload_templates(&self) -> Result<usize> {
        self.core.catalog.reload(&self.core.queue).await
    }

    pub async fn sync_templates(&self) -> Result<SyncReport> {
        self.core.catalog.sync(&self.core.queue).await
    }

    /// Stop the queue, draining for at most the configured timeout.
    ///
    /// Blocks the calling thread; call from a blocking context.
    pub fn shutdown(&self) -> bool {
        self.core.queue.shutdown()
    }
}
