//! Progress from events through to completion, milestones and claims.

use std::sync::Arc;

use questline::TaskError;
use questline::catalog::TaskKind;
use questline::engine::{Notification, ProgressEvent};
use uuid::Uuid;

use crate::helpers::{POOL, TestEngine, break_templates, config_for, start_engine};

async fn single_task_engine(target: u32, auto_claim: bool) -> (TestEngine, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_for(&dir.path().join("tasks.db"));
    config.categories[0].auto_claim = auto_claim;
    let t = start_engine(config, 5).await;
    t.engine
        .import_templates(break_templates(&["stone"], target))
        .await
        .unwrap();
    (t, dir)
}

fn stone(amount: u32) -> ProgressEvent {
    ProgressEvent::new(TaskKind::Break, "minecraft:stone", amount)
}

#[tokio::test]
async fn milestones_then_a_single_completion() {
    let (t, _dir) = single_task_engine(4, false).await;
    let player = Uuid::new_v4();
    t.engine.player_joined(player).await;
    assert_eq!(t.engine.active_tasks(player, "daily").await.unwrap().len(), 1);

    for _ in 0..3 {
        let report = t.engine.report_progress(player, &stone(1)).await.unwrap();
        assert_eq!(report.advanced, 1);
        assert!(report.completed.is_empty());
    }
    let report = t.engine.report_progress(player, &stone(1)).await.unwrap();
    assert_eq!(report.completed.len(), 1);

    let percents: Vec<u32> = t
        .sink
        .all()
        .into_iter()
        .filter_map(|(_, n)| match n {
            Notification::Milestone { percent, .. } => Some(percent),
            _ => None,
        })
        .collect();
    assert_eq!(percents, vec![25, 50, 75]);
    assert_eq!(t.sink.count("task-completed"), 1);
    assert_eq!(t.sink.count("category-complete"), 1);

    // Completed tasks stop matching.
    let report = t.engine.report_progress(player, &stone(1)).await.unwrap();
    assert_eq!(report.matched, 0);
    assert_eq!(t.sink.count("task-completed"), 1);
}

#[tokio::test]
async fn events_for_other_blocks_or_offline_players_do_nothing() {
    let (t, _dir) = single_task_engine(4, false).await;
    let player = Uuid::new_v4();

    let offline = t.engine.report_progress(player, &stone(1)).await.unwrap();
    assert_eq!(offline.matched, 0);

    t.engine.player_joined(player).await;
    let wrong_block = ProgressEvent::new(TaskKind::Break, "dirt", 3);
    assert_eq!(
        t.engine
            .report_progress(player, &wrong_block)
            .await
            .unwrap()
            .matched,
        0
    );
    let wrong_kind = ProgressEvent::new(TaskKind::Harvest, "stone", 3);
    assert_eq!(
        t.engine
            .report_progress(player, &wrong_kind)
            .await
            .unwrap()
            .matched,
        0
    );
    assert_eq!(t.engine.report_progress(player, &stone(0)).await.unwrap().matched, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_reports_complete_exactly_once() {
    let (t, _dir) = single_task_engine(5, false).await;
    let player = Uuid::new_v4();
    t.engine.player_joined(player).await;

    let handles: Vec<_> = (0..20)
        .map(|_| {
            let engine = Arc::clone(&t.engine);
            tokio::spawn(async move { engine.report_progress(player, &stone(1)).await })
        })
        .collect();
    let mut completions = 0;
    for handle in handles {
        completions += handle.await.unwrap().unwrap().completed.len();
    }

    assert_eq!(completions, 1);
    assert_eq!(t.sink.count("task-completed"), 1);
    let task = &t.engine.active_tasks(player, "daily").await.unwrap()[0];
    assert_eq!(task.progress(), 5);
    assert!(task.is_completed());

    // The store agrees once the player is reloaded.
    t.engine.player_left(player);
    let stored = &t.engine.active_tasks(player, "daily").await.unwrap()[0];
    assert_eq!(stored.progress(), 5);
    assert!(stored.is_completed());
}

#[tokio::test]
async fn claim_grants_once_and_rejects_a_second_claim() {
    let (t, _dir) = single_task_engine(2, false).await;
    let player = Uuid::new_v4();
    t.engine.player_joined(player).await;
    let task = t.engine.active_tasks(player, "daily").await.unwrap()[0].clone();

    let early = t
        .engine
        .claim_reward(player, "stone", task.assigned_at())
        .await
        .unwrap_err();
    assert!(matches!(early, TaskError::Validation(_)));

    t.engine.report_progress(player, &stone(2)).await.unwrap();
    let claimed = t
        .engine
        .claim_reward(player, "stone", task.assigned_at())
        .await
        .unwrap();
    assert!(claimed.is_claimed());
    assert_eq!(t.rewards.granted().len(), 1);
    assert_eq!(t.rewards.granted()[0].1.money, 10.0);
    assert_eq!(t.sink.count("reward-claimed"), 1);

    let again = t
        .engine
        .claim_reward(player, "stone", task.assigned_at())
        .await
        .unwrap_err();
    assert!(matches!(again, TaskError::Validation(_)));
    assert_eq!(t.rewards.granted().len(), 1);

    let missing = t
        .engine
        .claim_reward(player, "dirt", task.assigned_at())
        .await
        .unwrap_err();
    assert!(matches!(missing, TaskError::NotFound(_)));
}

#[tokio::test]
async fn offline_claim_reads_the_store() {
    let (t, _dir) = single_task_engine(2, false).await;
    let player = Uuid::new_v4();
    t.engine.player_joined(player).await;
    let assigned_at = t.engine.active_tasks(player, "daily").await.unwrap()[0].assigned_at();
    t.engine.report_progress(player, &stone(2)).await.unwrap();
    t.engine.player_left(player);

    t.engine
        .claim_reward(player, "stone", assigned_at)
        .await
        .unwrap();
    assert_eq!(t.rewards.granted().len(), 1);

    let stored = &t.engine.active_tasks(player, "daily").await.unwrap()[0];
    assert!(stored.is_claimed());
}

#[tokio::test]
async fn auto_claim_pays_on_completion() {
    let (t, _dir) = single_task_engine(3, true).await;
    let player = Uuid::new_v4();
    t.engine.player_joined(player).await;

    t.engine.report_progress(player, &stone(10)).await.unwrap();
    assert_eq!(t.rewards.granted().len(), 1);
    assert_eq!(t.sink.count("reward-claimed"), 1);
    assert_eq!(t.sink.count("task-completed"), 0);
    let task = &t.engine.active_tasks(player, "daily").await.unwrap()[0];
    assert!(task.is_claimed());
    assert_eq!(task.progress(), 3);
}

#[tokio::test]
async fn category_complete_fires_once_for_the_whole_set() {
    let dir = tempfile::tempdir().unwrap();
    let t = start_engine(config_for(&dir.path().join("tasks.db")), 11).await;
    t.engine
        .import_templates(break_templates(&POOL, 1))
        .await
        .unwrap();
    let player = Uuid::new_v4();
    t.engine.player_joined(player).await;
    let held = t.engine.active_tasks(player, "daily").await.unwrap();

    for (i, task) in held.iter().enumerate() {
        let event = ProgressEvent::new(TaskKind::Break, task.key(), 1);
        t.engine.report_progress(player, &event).await.unwrap();
        let expected = usize::from(i + 1 == held.len());
        assert_eq!(t.sink.count("category-complete"), expected);
    }
    assert_eq!(t.sink.count("task-completed"), 3);
}
