//! Template import, delta sync between processes and frozen snapshots.

use questline::TaskError;
use questline::catalog::{TaskKind, TaskTemplate};
use uuid::Uuid;

use crate::helpers::{break_templates, config_for, start_engine};

#[tokio::test]
async fn import_bumps_the_version_only_when_content_changes() {
    let dir = tempfile::tempdir().unwrap();
    let t = start_engine(config_for(&dir.path().join("tasks.db")), 1).await;

    let first = t
        .engine
        .import_templates(break_templates(&["stone", "dirt"], 4))
        .await
        .unwrap();
    assert_eq!(first.inserted, vec!["stone".to_owned(), "dirt".to_owned()]);

    let same = t
        .engine
        .import_templates(break_templates(&["stone"], 4))
        .await
        .unwrap();
    assert_eq!(same.unchanged, vec!["stone".to_owned()]);
    assert_eq!(t.engine.catalog().get("stone").unwrap().version, 1);

    let changed = t
        .engine
        .import_templates(break_templates(&["stone"], 8))
        .await
        .unwrap();
    assert_eq!(changed.updated, vec!["stone".to_owned()]);
    let stone = t.engine.catalog().get("stone").unwrap();
    assert_eq!(stone.version, 2);
    assert_eq!(stone.target_amount, 8);
}

#[tokio::test]
async fn invalid_imports_and_unknown_deletes_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let t = start_engine(config_for(&dir.path().join("tasks.db")), 1).await;

    assert!(matches!(
        t.engine.import_templates(Vec::new()).await,
        Err(TaskError::Validation(_))
    ));
    assert!(matches!(
        t.engine
            .import_templates(vec![TaskTemplate::new("nothing", TaskKind::Kill, 0)])
            .await,
        Err(TaskError::Validation(_))
    ));
    assert!(matches!(
        t.engine.delete_template("nothing").await,
        Err(TaskError::NotFound(_))
    ));
    assert!(t.engine.list_templates().is_empty());
}

#[tokio::test]
async fn second_engine_picks_up_changes_by_delta_sync() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("tasks.db");
    let writer = start_engine(config_for(&db), 1).await;
    let reader = start_engine(config_for(&db), 2).await;

    writer
        .engine
        .import_templates(break_templates(&["stone", "dirt"], 4))
        .await
        .unwrap();
    let initial = reader.engine.sync_templates().await.unwrap();
    assert_eq!(initial.added, vec!["dirt".to_owned(), "stone".to_owned()]);

    writer
        .engine
        .import_templates(break_templates(&["dirt", "sand"], 6))
        .await
        .unwrap();
    writer.engine.delete_template("stone").await.unwrap();

    let delta = reader.engine.sync_templates().await.unwrap();
    assert_eq!(delta.added, vec!["sand".to_owned()]);
    assert_eq!(delta.updated, vec!["dirt".to_owned()]);
    assert_eq!(delta.removed, vec!["stone".to_owned()]);

    let keys: Vec<String> = reader
        .engine
        .list_templates()
        .iter()
        .map(|t| t.key.clone())
        .collect();
    assert_eq!(keys, vec!["dirt".to_owned(), "sand".to_owned()]);
    assert_eq!(reader.engine.catalog().get("dirt").unwrap().target_amount, 6);

    assert!(reader.engine.sync_templates().await.unwrap().is_empty());
}

#[tokio::test]
async fn assigned_tasks_keep_the_template_they_were_given() {
    let dir = tempfile::tempdir().unwrap();
    let t = start_engine(config_for(&dir.path().join("tasks.db")), 1).await;
    t.engine
        .import_templates(break_templates(&["stone"], 4))
        .await
        .unwrap();
    let player = Uuid::new_v4();
    t.engine.player_joined(player).await;

    t.engine
        .import_templates(break_templates(&["stone"], 40))
        .await
        .unwrap();
    t.engine.delete_template("stone").await.unwrap();

    let cached = &t.engine.active_tasks(player, "daily").await.unwrap()[0];
    assert_eq!(cached.target(), 4);
    assert_eq!(cached.template_version(), 1);

    t.engine.player_left(player);
    let stored = &t.engine.active_tasks(player, "daily").await.unwrap()[0];
    assert_eq!(stored.target(), 4);
    assert_eq!(stored.template_version(), 1);
}
