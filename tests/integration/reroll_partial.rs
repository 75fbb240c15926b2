//! Reroll strategies, costs and refusals.

use std::collections::HashSet;

use questline::TaskError;
use questline::catalog::TaskKind;
use questline::engine::{Notification, ProgressEvent, RerollMode};
use uuid::Uuid;

use crate::helpers::{POOL, TestEngine, break_templates, config_for, start_engine};

async fn engine_with(cost: f64, keep_completed: bool) -> (TestEngine, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_for(&dir.path().join("tasks.db"));
    config.categories[0].reroll.cost = cost;
    config.categories[0].reroll.keep_completed = keep_completed;
    let t = start_engine(config, 42).await;
    t.engine
        .import_templates(break_templates(&POOL, 2))
        .await
        .unwrap();
    (t, dir)
}

async fn complete(t: &TestEngine, player: Uuid, key: &str) {
    let report = t
        .engine
        .report_progress(player, &ProgressEvent::new(TaskKind::Break, key, 2))
        .await
        .unwrap();
    assert_eq!(report.completed.len(), 1);
}

#[tokio::test]
async fn partial_reroll_keeps_completed_and_draws_fresh_keys() {
    let (t, _dir) = engine_with(0.0, true).await;
    let player = Uuid::new_v4();
    t.engine.player_joined(player).await;

    let before = t.engine.active_tasks(player, "daily").await.unwrap();
    assert_eq!(before.len(), 3);
    let done_key = before[0].key().to_owned();
    complete(&t, player, &done_key).await;
    let held: HashSet<String> = before.iter().map(|task| task.key().to_owned()).collect();

    let outcome = t
        .engine
        .reroll(player, "daily", RerollMode::Partial)
        .await
        .unwrap();
    assert_eq!(outcome.kept, 1);
    assert_eq!(outcome.removed, 2);
    assert_eq!(outcome.generated, 2);

    let after = t.engine.active_tasks(player, "daily").await.unwrap();
    assert_eq!(after.len(), 3);
    let kept = after.iter().find(|task| task.key() == done_key).unwrap();
    assert!(kept.is_completed());
    assert_eq!(kept.id(), before[0].id());
    for task in after.iter().filter(|task| task.key() != done_key) {
        assert!(!held.contains(task.key()), "{} was held before", task.key());
        assert_eq!(task.progress(), 0);
    }

    assert!(t.sink.all().iter().any(|(_, n)| matches!(
        n,
        Notification::Rerolled {
            kept: 1,
            generated: 2,
            ..
        }
    )));
    assert_eq!(t.engine.remaining_rerolls(player, "daily").await.unwrap(), 2);
}

#[tokio::test]
async fn nothing_to_reroll_when_every_slot_is_completed() {
    let (t, _dir) = engine_with(0.0, true).await;
    let player = Uuid::new_v4();
    t.engine.player_joined(player).await;
    for task in t.engine.active_tasks(player, "daily").await.unwrap() {
        complete(&t, player, task.key()).await;
    }

    let err = t
        .engine
        .reroll(player, "daily", RerollMode::Partial)
        .await
        .unwrap_err();
    assert!(matches!(err, TaskError::NothingToReroll(_)));
    // Refusal does not consume a credit.
    assert_eq!(t.engine.remaining_rerolls(player, "daily").await.unwrap(), 3);
}

#[tokio::test]
async fn force_reroll_replaces_completed_tasks_too() {
    let (t, _dir) = engine_with(0.0, false).await;
    let player = Uuid::new_v4();
    t.engine.player_joined(player).await;
    let policy = t.engine.category("daily").unwrap();
    assert_eq!(RerollMode::for_policy(&policy), RerollMode::Force);

    let first = t.engine.active_tasks(player, "daily").await.unwrap();
    complete(&t, player, first[0].key()).await;
    let outcome = t
        .engine
        .reroll(player, "daily", RerollMode::Force)
        .await
        .unwrap();
    assert_eq!(outcome.kept, 0);
    assert_eq!(outcome.removed, 3);
    let after = t.engine.active_tasks(player, "daily").await.unwrap();
    assert!(after.iter().all(|task| !task.is_completed()));
}

#[tokio::test]
async fn paid_reroll_checks_balance_and_withdraws_after_commit() {
    let (t, _dir) = engine_with(40.0, true).await;
    let player = Uuid::new_v4();
    t.engine.player_joined(player).await;

    let outcome = t
        .engine
        .reroll(player, "daily", RerollMode::Partial)
        .await
        .unwrap();
    assert_eq!(outcome.charged, 40.0);
    t.engine
        .reroll(player, "daily", RerollMode::Partial)
        .await
        .unwrap();

    // 20 left, cost 40.
    let err = t
        .engine
        .reroll(player, "daily", RerollMode::Partial)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        TaskError::InsufficientFunds { required, balance } if required == 40.0 && balance == 20.0
    ));
    assert_eq!(t.engine.remaining_rerolls(player, "daily").await.unwrap(), 1);
}

#[tokio::test]
async fn failed_withdrawal_does_not_undo_the_reroll() {
    let (t, _dir) = engine_with(10.0, true).await;
    let player = Uuid::new_v4();
    t.engine.player_joined(player).await;
    t.economy.refuse_withdrawals();

    let outcome = t
        .engine
        .reroll(player, "daily", RerollMode::Partial)
        .await
        .unwrap();
    assert_eq!(outcome.charged, 0.0);
    assert_eq!(outcome.generated, 3);
    assert_eq!(t.engine.remaining_rerolls(player, "daily").await.unwrap(), 2);
}

#[tokio::test]
async fn admin_full_reroll_ignores_switch_cost_and_quota() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_for(&dir.path().join("tasks.db"));
    config.categories[0].reroll.enabled = false;
    config.categories[0].reroll.cost = 1_000.0;
    let t = start_engine(config, 9).await;
    t.engine
        .import_templates(break_templates(&POOL, 2))
        .await
        .unwrap();
    let player = Uuid::new_v4();
    t.engine.player_joined(player).await;

    assert!(matches!(
        t.engine.reroll(player, "daily", RerollMode::Partial).await,
        Err(TaskError::Disabled(_))
    ));
    for _ in 0..5 {
        let outcome = t
            .engine
            .reroll(player, "daily", RerollMode::Full)
            .await
            .unwrap();
        assert_eq!(outcome.charged, 0.0);
    }
}

#[tokio::test]
async fn full_rerolls_refill_every_slot_from_a_small_pool() {
    let dir = tempfile::tempdir().unwrap();
    let t = start_engine(config_for(&dir.path().join("tasks.db")), 13).await;
    t.engine
        .import_templates(break_templates(&["stone", "dirt", "sand"], 2))
        .await
        .unwrap();
    let player = Uuid::new_v4();
    t.engine.player_joined(player).await;
    assert_eq!(t.engine.active_tasks(player, "daily").await.unwrap().len(), 3);

    for mode in [RerollMode::Force, RerollMode::Full] {
        let outcome = t.engine.reroll(player, "daily", mode).await.unwrap();
        assert_eq!(outcome.removed, 3, "{mode}");
        assert_eq!(outcome.generated, 3, "{mode}");
        assert_eq!(outcome.tasks.len(), 3, "{mode}");
        assert_eq!(t.engine.active_tasks(player, "daily").await.unwrap().len(), 3);
    }

    // The store agrees once the player is reloaded.
    t.engine.player_left(player);
    assert_eq!(t.engine.active_tasks(player, "daily").await.unwrap().len(), 3);
}
