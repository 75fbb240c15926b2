//! The per-cycle reroll limit holds under concurrent claims, including
//! claims made through separate connections as other processes would.

use std::sync::{Arc, Barrier};
use std::time::Duration;

use chrono::FixedOffset;
use questline::config::CategoryConfig;
use questline::engine::RerollMode;
use questline::policy::CategoryPolicy;
use questline::store::{open_connection, quota};
use questline::TaskError;
use uuid::Uuid;

use crate::helpers::{POOL, break_templates, config_for, monday_morning, start_engine};

#[test]
fn ten_connections_racing_get_exactly_max_claims() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tasks.db");
    let mut config = CategoryConfig::default();
    config.reroll.max_count = 3;
    let policy = Arc::new(CategoryPolicy::from_config(&config).unwrap());
    let player = Uuid::new_v4();
    let zone = FixedOffset::east_opt(0).unwrap();
    let now = monday_morning();

    let connections: Vec<_> = (0..10)
        .map(|_| open_connection(&path, Duration::from_secs(10)).unwrap())
        .collect();
    let barrier = Arc::new(Barrier::new(connections.len()));

    let handles: Vec<_> = connections
        .into_iter()
        .map(|conn| {
            let barrier = Arc::clone(&barrier);
            let policy = Arc::clone(&policy);
            std::thread::spawn(move || {
                barrier.wait();
                quota::claim(&conn, player, &policy, now, &zone).unwrap()
            })
        })
        .collect();

    let granted = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|ok| *ok)
        .count();
    assert_eq!(granted, 3);

    let conn = open_connection(&path, Duration::from_secs(1)).unwrap();
    assert_eq!(quota::read(&conn, player, "daily").unwrap().unwrap().used, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn two_engines_on_one_file_share_the_quota() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("tasks.db");
    let first = start_engine(config_for(&db), 1).await;
    let second = start_engine(config_for(&db), 2).await;
    first
        .engine
        .import_templates(break_templates(&POOL, 5))
        .await
        .unwrap();
    second.engine.reload_templates().await.unwrap();

    let player = Uuid::new_v4();
    first.engine.player_joined(player).await;

    let mut handles = Vec::new();
    for i in 0..10 {
        let engine = if i % 2 == 0 {
            Arc::clone(&first.engine)
        } else {
            Arc::clone(&second.engine)
        };
        handles.push(tokio::spawn(async move {
            engine.reroll(player, "daily", RerollMode::Force).await
        }));
    }

    let mut granted = 0;
    let mut denied = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => granted += 1,
            Err(TaskError::QuotaExceeded { max, .. }) => {
                assert_eq!(max, 3);
                denied += 1;
            }
            Err(other) => panic!("unexpected reroll error: {other}"),
        }
    }
    assert_eq!(granted, 3);
    assert_eq!(denied, 7);
    assert_eq!(first.engine.remaining_rerolls(player, "daily").await.unwrap(), 0);
}

#[tokio::test]
async fn quota_comes_back_next_cycle_and_on_admin_reset() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_for(&dir.path().join("tasks.db"));
    config.categories[0].reroll.max_count = 1;
    let t = start_engine(config, 3).await;
    t.engine
        .import_templates(break_templates(&POOL, 5))
        .await
        .unwrap();
    let player = Uuid::new_v4();
    t.engine.player_joined(player).await;

    t.engine
        .reroll(player, "daily", RerollMode::Force)
        .await
        .unwrap();
    assert!(matches!(
        t.engine.reroll(player, "daily", RerollMode::Force).await,
        Err(TaskError::QuotaExceeded { .. })
    ));

    t.engine.reset_rerolls(player, "daily").await.unwrap();
    assert_eq!(t.engine.remaining_rerolls(player, "daily").await.unwrap(), 1);
    t.engine
        .reroll(player, "daily", RerollMode::Force)
        .await
        .unwrap();
    assert_eq!(t.engine.remaining_rerolls(player, "daily").await.unwrap(), 0);

    // The reroll reset policy is daily at 04:00.
    t.clock.advance(chrono::TimeDelta::days(1));
    assert_eq!(t.engine.remaining_rerolls(player, "daily").await.unwrap(), 1);

    assert_eq!(t.engine.reset_all_rerolls(Some("daily")).await.unwrap(), 1);
}
