//! Integration tests for the queue tiers: promotion, popping, the
//! index, dead-lettering, and the concurrency counter.

use chrono::{Duration, Utc};
use uuid::Uuid;

use faultline_db::models::{QueueTier, Task, TaskKind, TaskState};
use faultline_db::queries::queue;
use faultline_test_utils::{create_test_db, drop_test_db};

fn make_task(kind: TaskKind) -> Task {
    Task {
        id: Uuid::now_v7(),
        kind,
        state: TaskState::Pending,
        payload: serde_json::json!({}),
        immediate: false,
        execute_at: Utc::now(),
        cron_expr: None,
        max_attempts: 2,
        backoff_secs: 5,
        restart_num: 0,
        parent_task_id: None,
        trace_id: Uuid::now_v7(),
        group_id: Uuid::now_v7(),
        project_id: String::new(),
        user_id: String::new(),
        sequence: 0,
        level: 1,
        trace_carrier: serde_json::json!({}),
        task_carrier: serde_json::json!({}),
        error_log: serde_json::json!([]),
        last_event: String::new(),
        created_at: Utc::now(),
        started_at: None,
        completed_at: None,
    }
}

#[tokio::test]
async fn submit_ready_pops_in_arrival_order() {
    let (pool, db_name) = create_test_db().await;

    let first = make_task(TaskKind::BuildContainer);
    let second = make_task(TaskKind::CollectResult);
    queue::submit_ready(&pool, &first).await.unwrap();
    queue::submit_ready(&pool, &second).await.unwrap();

    let popped = queue::pop_ready(&pool).await.unwrap().unwrap();
    assert_eq!(popped.id, first.id);
    let popped = queue::pop_ready(&pool).await.unwrap().unwrap();
    assert_eq!(popped.id, second.id);
    assert!(queue::pop_ready(&pool).await.unwrap().is_none());

    // Popped tasks leave the index.
    assert_eq!(queue::index_tier(&pool, first.id).await.unwrap(), None);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn delayed_promote_roundtrip() {
    let (pool, db_name) = create_test_db().await;

    let due = make_task(TaskKind::RestartPedestal);
    let not_due = make_task(TaskKind::RestartPedestal);
    let now = Utc::now();

    queue::submit_delayed(&pool, &due, now - Duration::seconds(5))
        .await
        .unwrap();
    queue::submit_delayed(&pool, &not_due, now + Duration::hours(1))
        .await
        .unwrap();

    let promoted = queue::promote_due(&pool, now).await.unwrap();
    assert_eq!(promoted.len(), 1);
    assert_eq!(promoted[0].id, due.id);

    // The due task is now ready, the future one still delayed.
    assert_eq!(
        queue::index_tier(&pool, due.id).await.unwrap(),
        Some(QueueTier::Ready)
    );
    assert_eq!(
        queue::index_tier(&pool, not_due.id).await.unwrap(),
        Some(QueueTier::Delayed)
    );

    let popped = queue::pop_ready(&pool).await.unwrap().unwrap();
    assert_eq!(popped.id, due.id);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn concurrent_promoters_promote_exactly_once() {
    let (pool, db_name) = create_test_db().await;

    let now = Utc::now();
    let mut ids = Vec::new();
    for _ in 0..20 {
        let task = make_task(TaskKind::BuildDatapack);
        ids.push(task.id);
        queue::submit_delayed(&pool, &task, now - Duration::seconds(1))
            .await
            .unwrap();
    }

    // Two promoters over the same due window.
    let (a, b) = tokio::join!(
        queue::promote_due(&pool, now),
        queue::promote_due(&pool, now),
    );
    let a = a.unwrap();
    let b = b.unwrap();
    assert_eq!(a.len() + b.len(), 20, "no task promoted twice or lost");

    // Every task appears exactly once in ready.
    let mut seen = std::collections::HashSet::new();
    while let Some(task) = queue::pop_ready(&pool).await.unwrap() {
        assert!(seen.insert(task.id), "duplicate ready entry for {}", task.id);
    }
    assert_eq!(seen.len(), 20);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn remove_consults_index() {
    let (pool, db_name) = create_test_db().await;

    let ready = make_task(TaskKind::RunAlgorithm);
    let delayed = make_task(TaskKind::RunAlgorithm);
    queue::submit_ready(&pool, &ready).await.unwrap();
    queue::submit_delayed(&pool, &delayed, Utc::now() + Duration::hours(1))
        .await
        .unwrap();

    assert_eq!(
        queue::remove(&pool, ready.id).await.unwrap(),
        QueueTier::Ready
    );
    assert_eq!(
        queue::remove(&pool, delayed.id).await.unwrap(),
        QueueTier::Delayed
    );

    // Gone from both tier and index.
    assert!(queue::pop_ready(&pool).await.unwrap().is_none());
    assert!(queue::promote_due(&pool, Utc::now() + Duration::days(1))
        .await
        .unwrap()
        .is_empty());

    // Unknown id errors.
    let err = queue::remove(&pool, Uuid::now_v7()).await.unwrap_err();
    assert!(err.to_string().contains("not found"));

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn dead_letter_holds_tasks() {
    let (pool, db_name) = create_test_db().await;

    let task = make_task(TaskKind::FaultInjection);
    queue::move_to_dead(&pool, &task, Utc::now()).await.unwrap();

    assert_eq!(
        queue::index_tier(&pool, task.id).await.unwrap(),
        Some(QueueTier::Dead)
    );
    let dead = queue::list_dead(&pool, 10).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].id, task.id);

    let (ready, delayed, dead) = queue::tier_lengths(&pool).await.unwrap();
    assert_eq!((ready, delayed, dead), (0, 0, 1));

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn slots_cap_concurrency() {
    let (pool, db_name) = create_test_db().await;

    queue::set_max_slots(&pool, 3).await.unwrap();

    assert!(queue::acquire_slot(&pool).await.unwrap());
    assert!(queue::acquire_slot(&pool).await.unwrap());
    assert!(queue::acquire_slot(&pool).await.unwrap());
    // Cap reached.
    assert!(!queue::acquire_slot(&pool).await.unwrap());

    queue::release_slot(&pool).await.unwrap();
    assert!(queue::acquire_slot(&pool).await.unwrap());

    // Release floors at zero.
    for _ in 0..10 {
        queue::release_slot(&pool).await.unwrap();
    }
    let (in_use, _) = queue::slot_usage(&pool).await.unwrap();
    assert_eq!(in_use, 0);

    drop_test_db(&db_name).await;
}
