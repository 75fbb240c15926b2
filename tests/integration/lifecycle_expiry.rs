//! Expiry sweeps, manual assignment and retention cleanup.

use chrono::TimeDelta;
use questline::TaskError;
use questline::clock::PolicyKind;
use questline::config::{CategoryConfig, PeriodConfig};
use questline::engine::{Notification, RerollMode};
use uuid::Uuid;

use crate::helpers::{POOL, TestEngine, break_templates, config_for, monday_morning, start_engine};

async fn pool_engine() -> (TestEngine, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let t = start_engine(config_for(&dir.path().join("tasks.db")), 21).await;
    t.engine
        .import_templates(break_templates(&POOL, 4))
        .await
        .unwrap();
    (t, dir)
}

#[tokio::test]
async fn join_fills_every_slot_and_announces_it() {
    let (t, _dir) = pool_engine().await;
    let player = Uuid::new_v4();

    let changed = t.engine.player_joined(player).await;
    assert_eq!(changed, vec!["daily".to_owned()]);
    let held = t.engine.active_tasks(player, "daily").await.unwrap();
    assert_eq!(held.len(), 3);
    assert!(held.iter().all(|task| task.assigned_at() == monday_morning()));
    assert_eq!(t.sink.count("tasks-refreshed"), 1);

    // A second join in the same cycle changes nothing.
    assert!(t.engine.player_joined(player).await.is_empty());
    assert_eq!(t.sink.count("tasks-refreshed"), 1);
}

#[tokio::test]
async fn sweep_waits_for_the_reset_time_then_replaces() {
    let (t, _dir) = pool_engine().await;
    let player = Uuid::new_v4();
    t.engine.player_joined(player).await;
    t.sink.clear();
    let before = t.engine.active_tasks(player, "daily").await.unwrap();

    // Tuesday 03:00, still before the 04:00 reset.
    t.clock.advance(TimeDelta::hours(22));
    assert_eq!(t.engine.sweep().await, 0);
    assert!(t.sink.all().is_empty());

    // Tuesday 05:00.
    t.clock.advance(TimeDelta::hours(2));
    assert_eq!(t.engine.sweep().await, 1);
    let after = t.engine.active_tasks(player, "daily").await.unwrap();
    assert_eq!(after.len(), 3);
    assert!(after.iter().all(|task| task.assigned_at() > before[0].assigned_at()));
    assert!(after.iter().all(|task| task.progress() == 0));

    let seen = t.sink.all();
    assert_eq!(seen.len(), 1);
    assert_eq!(
        seen[0],
        (
            player,
            Notification::Refreshed {
                categories: vec!["daily".to_owned()]
            }
        )
    );
}

#[tokio::test]
async fn next_reset_is_the_following_morning() {
    let (t, _dir) = pool_engine().await;
    let player = Uuid::new_v4();
    t.engine.player_joined(player).await;
    let next = t.engine.next_reset(player, "daily").await.unwrap().unwrap();
    assert_eq!(next, monday_morning() + TimeDelta::hours(23));
}

#[tokio::test]
async fn manual_assignment_rejects_duplicates_but_ignores_the_cap() {
    let (t, _dir) = pool_engine().await;
    let player = Uuid::new_v4();
    t.engine.player_joined(player).await;
    let held = t.engine.active_tasks(player, "daily").await.unwrap();
    let held_key = held[0].key().to_owned();
    let free_key = POOL
        .iter()
        .find(|key| held.iter().all(|task| task.key() != **key))
        .unwrap();

    let duplicate = t
        .engine
        .assign_task(player, "daily", &held_key)
        .await
        .unwrap_err();
    assert!(matches!(duplicate, TaskError::Validation(_)));

    let assigned = t.engine.assign_task(player, "daily", free_key).await.unwrap();
    assert_eq!(assigned.key(), *free_key);
    assert_eq!(t.engine.active_tasks(player, "daily").await.unwrap().len(), 4);
    assert_eq!(t.sink.count("task-assigned"), 1);

    let unknown = t
        .engine
        .assign_task(player, "daily", "bedrock")
        .await
        .unwrap_err();
    assert!(matches!(unknown, TaskError::NotFound(_)));
}

#[tokio::test]
async fn remove_task_reports_missing_keys() {
    let (t, _dir) = pool_engine().await;
    let player = Uuid::new_v4();
    t.engine.player_joined(player).await;
    let key = t.engine.active_tasks(player, "daily").await.unwrap()[0]
        .key()
        .to_owned();

    assert_eq!(t.engine.remove_task(player, "daily", &key).await.unwrap(), 1);
    assert_eq!(t.engine.active_tasks(player, "daily").await.unwrap().len(), 2);
    assert!(matches!(
        t.engine.remove_task(player, "daily", &key).await,
        Err(TaskError::NotFound(_))
    ));

    // Refilled on the next refresh.
    let outcome = t.engine.refresh_category(player, "daily").await.unwrap();
    assert_eq!(outcome.generated, 1);
    assert_eq!(outcome.tasks.len(), 3);
}

#[tokio::test]
async fn disabled_and_unknown_categories_are_refused() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_for(&dir.path().join("tasks.db"));
    config.categories.push(CategoryConfig {
        id: "event".to_owned(),
        enabled: false,
        ..CategoryConfig::default()
    });
    let t = start_engine(config, 2).await;
    let player = Uuid::new_v4();

    assert!(matches!(
        t.engine.refresh_category(player, "event").await,
        Err(TaskError::Disabled(_))
    ));
    assert!(matches!(
        t.engine.refresh_category(player, "weekly").await,
        Err(TaskError::Validation(_))
    ));
}

#[tokio::test]
async fn offline_players_fall_back_to_the_store() {
    let (t, _dir) = pool_engine().await;
    let player = Uuid::new_v4();
    t.engine.player_joined(player).await;
    t.engine.player_left(player);

    assert!(!t.engine.cache().contains(player));
    assert_eq!(t.engine.active_tasks(player, "daily").await.unwrap().len(), 3);

    // Offline players are not swept.
    t.clock.advance(TimeDelta::days(1));
    assert_eq!(t.engine.sweep().await, 0);
}

#[tokio::test]
async fn writes_for_a_player_who_left_do_not_reload_them() {
    let (t, _dir) = pool_engine().await;
    let player = Uuid::new_v4();
    t.engine.player_joined(player).await;
    t.engine.player_left(player);
    t.sink.clear();

    t.clock.advance(TimeDelta::days(1));
    let outcome = t.engine.refresh_category(player, "daily").await.unwrap();
    assert_eq!(outcome.generated, 3);
    assert!(!t.engine.cache().contains(player));

    let free_key = POOL
        .iter()
        .find(|key| outcome.tasks.iter().all(|task| task.key() != **key))
        .unwrap();
    t.engine.assign_task(player, "daily", free_key).await.unwrap();
    assert!(!t.engine.cache().contains(player));
    t.engine.remove_task(player, "daily", free_key).await.unwrap();
    assert!(!t.engine.cache().contains(player));

    t.clock.advance(TimeDelta::days(1));
    assert_eq!(t.engine.sweep().await, 0);
    assert_eq!(t.sink.count("tasks-refreshed"), 0);
    assert!(!t.engine.cache().contains(player));
}

#[tokio::test]
async fn retention_waits_for_long_relative_windows() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_for(&dir.path().join("tasks.db"));
    config.categories[0].expire = PeriodConfig {
        policy: PolicyKind::Relative,
        duration: "30d".to_owned(),
        ..PeriodConfig::default()
    };
    let t = start_engine(config, 17).await;
    t.engine
        .import_templates(break_templates(&POOL, 4))
        .await
        .unwrap();
    let player = Uuid::new_v4();
    t.engine.player_joined(player).await;

    // Past the retention window but well inside the 30 day lifetime.
    t.clock.advance(TimeDelta::days(10));
    assert_eq!(t.engine.cleanup_retained(7).await.unwrap().tasks, 0);
    assert_eq!(t.engine.active_tasks(player, "daily").await.unwrap().len(), 3);

    t.clock.advance(TimeDelta::days(25));
    assert_eq!(t.engine.cleanup_retained(7).await.unwrap().tasks, 3);
    assert!(t.engine.active_tasks(player, "daily").await.unwrap().is_empty());
    assert!(t.engine.cache().contains(player));
}

#[tokio::test]
async fn retention_drops_old_rows_and_idle_quotas() {
    let (t, _dir) = pool_engine().await;
    let player = Uuid::new_v4();
    t.engine.player_joined(player).await;
    t.engine
        .reroll(player, "daily", RerollMode::Force)
        .await
        .unwrap();
    t.engine.player_left(player);

    assert_eq!(
        t.engine.cleanup_retained(0).await.unwrap(),
        Default::default()
    );

    t.clock.advance(TimeDelta::days(8));
    let first = t.engine.cleanup_retained(7).await.unwrap();
    assert_eq!(first.tasks, 3);
    assert_eq!(first.quotas, 0);

    t.clock.advance(TimeDelta::days(7));
    let second = t.engine.cleanup_retained(7).await.unwrap();
    assert_eq!(second.tasks, 0);
    assert_eq!(second.quotas, 1);
}
