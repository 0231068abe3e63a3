//! Integration tests for the delayed-task scheduler.

mod common;

use chrono::{Duration, Utc};

use faultline_core::scheduler;
use faultline_db::models::{TaskKind, TraceKind};
use faultline_db::queries::queue;
use faultline_test_utils::{create_test_db, drop_test_db};

use common::{make_engine, make_task_with_trace};

#[tokio::test]
async fn promote_once_moves_due_tasks() {
    let (pool, db_name) = create_test_db().await;
    let engine = make_engine(&pool, &[], 0).await;

    let mut task = make_task_with_trace(
        &pool,
        TraceKind::DatapackBuild,
        TaskKind::BuildDatapack,
        1,
        serde_json::json!({}),
    )
    .await;
    task.immediate = false;
    task.execute_at = Utc::now() - Duration::seconds(3);
    engine.queue.submit_delayed(&task).await.unwrap();

    let promoted = scheduler::promote_once(&engine.queue).await.unwrap();
    assert_eq!(promoted, 1);

    let ready = engine
        .queue
        .get_ready(std::time::Duration::from_secs(1))
        .await
        .unwrap()
        .expect("promoted task should be ready");
    assert_eq!(ready.id, task.id);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn cron_task_is_requeued_for_next_occurrence() {
    let (pool, db_name) = create_test_db().await;
    let engine = make_engine(&pool, &[], 0).await;

    let mut task = make_task_with_trace(
        &pool,
        TraceKind::DatapackBuild,
        TaskKind::BuildDatapack,
        1,
        serde_json::json!({}),
    )
    .await;
    task.immediate = false;
    task.execute_at = Utc::now() - Duration::seconds(1);
    task.cron_expr = Some("0 * * * *".to_owned());
    engine.queue.submit_delayed(&task).await.unwrap();

    let promoted = scheduler::promote_once(&engine.queue).await.unwrap();
    assert_eq!(promoted, 1);

    // The promoted instance is ready; a recurrence sits delayed at the
    // next hour boundary.
    let (ready, delayed, _) = queue::tier_lengths(&pool).await.unwrap();
    assert_eq!((ready, delayed), (1, 1));

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn bad_cron_drops_recurrence_without_stalling() {
    let (pool, db_name) = create_test_db().await;
    let engine = make_engine(&pool, &[], 0).await;

    let mut task = make_task_with_trace(
        &pool,
        TraceKind::DatapackBuild,
        TaskKind::BuildDatapack,
        1,
        serde_json::json!({}),
    )
    .await;
    task.immediate = false;
    task.execute_at = Utc::now() - Duration::seconds(1);
    task.cron_expr = Some("not a cron".to_owned());
    engine.queue.submit_delayed(&task).await.unwrap();

    // The promotion itself succeeds; only the recurrence is dropped.
    let promoted = scheduler::promote_once(&engine.queue).await.unwrap();
    assert_eq!(promoted, 1);

    let (ready, delayed, _) = queue::tier_lengths(&pool).await.unwrap();
    assert_eq!((ready, delayed), (1, 0));

    drop_test_db(&db_name).await;
}
