//! Shared helpers for integration tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use questline::catalog::{Reward, TaskKind, TaskTemplate};
use questline::clock::ManualClock;
use questline::config::{CategoryConfig, EngineConfig};
use questline::engine::{
    Economy, Engine, EngineBuilder, Notification, NotificationSink, RewardGranter, TaskGenerator,
};
use questline::store::InlineDispatcher;
use uuid::Uuid;

/// Monday 2024-01-01 05:00 UTC, one hour after the default 04:00 reset.
pub(crate) fn monday_morning() -> DateTime<Utc> {
    DateTime::from_timestamp(1_704_085_200, 0).expect("valid timestamp")
}

/// Collects every notification.
#[derive(Default)]
pub(crate) struct RecordingSink {
    seen: Mutex<Vec<(Uuid, Notification)>>,
}

impl RecordingSink {
    pub(crate) fn all(&self) -> Vec<(Uuid, Notification)> {
        self.seen.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, kind: &str) -> usize {
        self.all().iter().filter(|(_, n)| n.kind() == kind).count()
    }

    pub(crate) fn clear(&self) {
        self.seen.lock().unwrap().clear();
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, player: Uuid, notification: Notification) {
        self.seen.lock().unwrap().push((player, notification));
    }
}

/// Collects granted rewards.
#[derive(Default)]
pub(crate) struct RecordingRewards {
    granted: Mutex<Vec<(Uuid, Reward)>>,
}

impl RecordingRewards {
    pub(crate) fn granted(&self) -> Vec<(Uuid, Reward)> {
        self.granted.lock().unwrap().clone()
    }
}

impl RewardGranter for RecordingRewards {
    fn grant(&self, player: Uuid, reward: &Reward) {
        self.granted.lock().unwrap().push((player, reward.clone()));
    }
}

/// Wallet per player with a default starting balance.
pub(crate) struct TestEconomy {
    starting: f64,
    balances: Mutex<HashMap<Uuid, f64>>,
    refuse: AtomicBool,
}

impl TestEconomy {
    pub(crate) fn new(starting: f64) -> Self {
        Self {
            starting,
            balances: Mutex::new(HashMap::new()),
            refuse: AtomicBool::new(false),
        }
    }

    /// Make every later withdrawal fail.
    pub(crate) fn refuse_withdrawals(&self) {
        self.refuse.store(true, Ordering::SeqCst);
    }
}

impl Economy for TestEconomy {
    fn balance(&self, player: Uuid) -> f64 {
        *self
            .balances
            .lock()
            .unwrap()
            .get(&player)
            .unwrap_or(&self.starting)
    }

    fn withdraw(&self, player: Uuid, amount: f64) -> bool {
        if self.refuse.load(Ordering::SeqCst) {
            return false;
        }
        let mut balances = self.balances.lock().unwrap();
        let balance = balances.entry(player).or_insert(self.starting);
        if *balance < amount {
            return false;
        }
        *balance -= amount;
        true
    }
}

/// Engine wired to recording collaborators and a manual clock.
pub(crate) struct TestEngine {
    pub(crate) engine: Arc<Engine>,
    pub(crate) clock: Arc<ManualClock>,
    pub(crate) sink: Arc<RecordingSink>,
    pub(crate) rewards: Arc<RecordingRewards>,
    pub(crate) economy: Arc<TestEconomy>,
}

/// Config for a UTC engine on `db` with one default daily category.
pub(crate) fn config_for(db: &Path) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.timezone = "utc".into();
    config.database.path = Some(db.to_path_buf());
    config.database.busy_timeout_ms = 10_000;
    config.categories = vec![CategoryConfig::default()];
    config
}

pub(crate) async fn start_engine(config: EngineConfig, seed: u64) -> TestEngine {
    let clock = Arc::new(ManualClock::new(monday_morning()));
    let sink = Arc::new(RecordingSink::default());
    let rewards = Arc::new(RecordingRewards::default());
    let economy = Arc::new(TestEconomy::new(100.0));
    let engine = EngineBuilder::new(config)
        .with_clock(clock.clone())
        .with_generator(TaskGenerator::with_seed(seed))
        .with_notifications(sink.clone())
        .with_rewards(rewards.clone())
        .with_economy(economy.clone())
        .with_dispatcher(Arc::new(InlineDispatcher))
        .start()
        .await
        .expect("engine starts");
    TestEngine {
        engine: Arc::new(engine),
        clock,
        sink,
        rewards,
        economy,
    }
}

/// One break-block template per key, selector equal to the key.
pub(crate) fn break_templates(keys: &[&str], target: u32) -> Vec<TaskTemplate> {
    keys.iter()
        .map(|key| {
            TaskTemplate::new(*key, TaskKind::Break, target)
                .with_targets([*key])
                .with_reward(Reward {
                    money: 10.0,
                    ..Reward::default()
                })
        })
        .collect()
}

pub(crate) const POOL: [&str; 7] = [
    "stone", "dirt", "sand", "gravel", "clay", "andesite", "granite",
];
