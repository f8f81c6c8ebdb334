//! Integration tests for the `orchestrations` query module.

use delegator_db::models::{OrchestrationStatus, TaskStatus, WorkerModel};
use delegator_db::queries::orchestrations::{self, insert_orchestration};
use delegator_db::queries::tasks::{self, NewTask};
use delegator_test_utils::{create_test_db, drop_test_db};

#[tokio::test]
async fn insert_and_get_roundtrip() {
    let (pool, db_name) = create_test_db().await;

    let inserted = insert_orchestration(&pool, 3).await.expect("insert should succeed");
    assert_eq!(inserted.status, OrchestrationStatus::Pending);
    assert_eq!(inserted.total_tasks, 3);
    assert_eq!(inserted.completed_tasks, 0);

    let fetched = orchestrations::get_orchestration(&pool, inserted.id)
        .await
        .expect("get should succeed")
        .expect("orchestration should exist");
    assert_eq!(fetched.id, inserted.id);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn transition_status_stamps_timestamps() {
    let (pool, db_name) = create_test_db().await;

    let orchestration = insert_orchestration(&pool, 1).await.unwrap();

    let affected = orchestrations::transition_status(
        &pool,
        orchestration.id,
        OrchestrationStatus::Pending,
        OrchestrationStatus::Running,
    )
    .await
    .expect("transition should succeed");
    assert_eq!(affected, 1);

    let fetched = orchestrations::get_orchestration(&pool, orchestration.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fetched.status, OrchestrationStatus::Running);
    assert!(fetched.started_at.is_some());
    assert!(fetched.ended_at.is_none());

    orchestrations::transition_status(
        &pool,
        orchestration.id,
        OrchestrationStatus::Running,
        OrchestrationStatus::Completed,
    )
    .await
    .unwrap();

    let fetched = orchestrations::get_orchestration(&pool, orchestration.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fetched.status, OrchestrationStatus::Completed);
    assert!(fetched.ended_at.is_some());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn refresh_counts_reflects_task_statuses() {
    let (pool, db_name) = create_test_db().await;

    let orchestration = insert_orchestration(&pool, 2).await.unwrap();

    let mut completed_new = NewTask {
        working_directory: "/tmp".into(),
        system_prompt: "s".into(),
        execution_prompt: "e".into(),
        model: WorkerModel::Sonnet,
        orchestration_id: Some(orchestration.id),
        identifier: Some("a".into()),
        depends_on: None,
        initial_delay: None,
    };
    let completed = tasks::insert_task(&pool, &completed_new).await.unwrap();
    tasks::transition_status(&pool, completed.id, TaskStatus::Pending, TaskStatus::Running)
        .await
        .unwrap();
    tasks::finalize(
        &pool,
        completed.id,
        TaskStatus::Running,
        TaskStatus::Completed,
        Some("ok"),
    )
    .await
    .unwrap();

    completed_new.identifier = Some("b".into());
    let failed = tasks::insert_task(&pool, &completed_new).await.unwrap();
    tasks::transition_status(&pool, failed.id, TaskStatus::Pending, TaskStatus::Running)
        .await
        .unwrap();
    tasks::finalize(
        &pool,
        failed.id,
        TaskStatus::Running,
        TaskStatus::Failed,
        Some("boom"),
    )
    .await
    .unwrap();

    let refreshed = orchestrations::refresh_counts(&pool, orchestration.id)
        .await
        .expect("refresh should succeed");

    assert_eq!(refreshed.completed_tasks, 1);
    assert_eq!(refreshed.failed_tasks, 1);
    assert_eq!(refreshed.skipped_tasks, 0);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn list_orchestrations_orders_newest_first() {
    let (pool, db_name) = create_test_db().await;

    let first = insert_orchestration(&pool, 1).await.unwrap();
    let second = insert_orchestration(&pool, 1).await.unwrap();

    let list = orchestrations::list_orchestrations(&pool)
        .await
        .expect("list should succeed");

    let ids: Vec<i64> = list.iter().map(|o| o.id).collect();
    assert!(ids.contains(&first.id));
    assert!(ids.contains(&second.id));
    // second was created after first, so it should sort first (DESC).
    let second_pos = ids.iter().position(|&id| id == second.id).unwrap();
    let first_pos = ids.iter().position(|&id| id == first.id).unwrap();
    assert!(second_pos < first_pos);

    pool.close().await;
    drop_test_db(&db_name).await;
}
