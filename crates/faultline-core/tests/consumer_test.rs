//! Integration tests for the consumer: retry loop, dead-lettering,
//! cancellation, and orphan recovery.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use faultline_core::consumer::Consumer;
use faultline_core::error::ExecError;
use faultline_core::events::names;
use faultline_core::executor::{ExecContext, ExecOutcome, Executor, ExecutorRegistry};
use faultline_db::models::{QueueTier, RateService, Task, TaskKind, TaskState, TraceKind};
use faultline_db::queries::{queue, stream_events, tasks as task_db};
use faultline_test_utils::{create_test_db, drop_test_db};

use common::{make_engine, make_task_with_trace};

/// Poll a task's state until it matches or the deadline passes.
async fn wait_for_state(pool: &sqlx::PgPool, task: &Task, want: TaskState) -> TaskState {
    for _ in 0..200 {
        let current = task_db::get_task(pool, task.id).await.unwrap().unwrap().state;
        if current == want {
            return current;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    task_db::get_task(pool, task.id).await.unwrap().unwrap().state
}

#[tokio::test]
async fn build_retries_then_succeeds() {
    let (pool, db_name) = create_test_db().await;
    // Build fails twice, succeeds on the third attempt; max_attempts=2
    // gives exactly three attempts.
    let engine = make_engine(&pool, &[], 2).await;

    let task = make_task_with_trace(
        &pool,
        TraceKind::DatapackBuild,
        TaskKind::BuildContainer,
        1,
        serde_json::json!({
            "image_ref": "registry.local/bench:1",
            "source_path": "/nonexistent/faultline-test-src",
        }),
    )
    .await;
    engine.queue.submit_ready(&task).await.unwrap();

    let registry = Arc::new(ExecutorRegistry::with_defaults());
    let consumer = Arc::new(Consumer::new(engine.ctx.clone(), registry));
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(Arc::clone(&consumer).run(cancel.clone()));

    let state = wait_for_state(&pool, &task, TaskState::Completed).await;
    assert_eq!(state, TaskState::Completed);
    cancel.cancel();
    let _ = handle.await;

    // Three build invocations happened.
    assert_eq!(engine.build.calls.load(Ordering::SeqCst), 3);

    // Two retry events and one final build success in the stream.
    let events = stream_events::read_after(&pool, task.trace_id, 0, 100)
        .await
        .unwrap();
    let retries = events
        .iter()
        .filter(|e| e.event == names::TASK_RETRY_STATUS)
        .count();
    assert_eq!(retries, 2);
    assert!(events.iter().any(|e| e.event == names::IMAGE_BUILD_SUCCESS));

    // Restart counter tracked both retries; the token is free again.
    let row = task_db::get_task(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(row.restart_num, 2);
    assert_eq!(
        engine
            .limiter
            .occupancy(RateService::BuildContainer)
            .await
            .unwrap(),
        0
    );

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn exhausted_retries_dead_letter_the_task() {
    let (pool, db_name) = create_test_db().await;
    // Build never succeeds.
    let engine = make_engine(&pool, &[], 99).await;

    let task = make_task_with_trace(
        &pool,
        TraceKind::DatapackBuild,
        TaskKind::BuildContainer,
        1,
        serde_json::json!({
            "image_ref": "registry.local/bench:1",
            "source_path": "/nonexistent/faultline-test-src",
        }),
    )
    .await;
    engine.queue.submit_ready(&task).await.unwrap();

    let registry = Arc::new(ExecutorRegistry::with_defaults());
    let consumer = Arc::new(Consumer::new(engine.ctx.clone(), registry));
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(Arc::clone(&consumer).run(cancel.clone()));

    let state = wait_for_state(&pool, &task, TaskState::Error).await;
    assert_eq!(state, TaskState::Error);
    cancel.cancel();
    let _ = handle.await;

    // The task sits in the dead-letter tier with its error log filled.
    assert_eq!(
        queue::index_tier(&pool, task.id).await.unwrap(),
        Some(QueueTier::Dead)
    );
    let row = task_db::get_task(&pool, task.id).await.unwrap().unwrap();
    assert!(!row.error_log.as_array().unwrap().is_empty());
    assert!(row.restart_num <= row.max_attempts);

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn malformed_payload_fails_without_retry() {
    let (pool, db_name) = create_test_db().await;
    let engine = make_engine(&pool, &[], 0).await;

    let task = make_task_with_trace(
        &pool,
        TraceKind::DatapackBuild,
        TaskKind::BuildContainer,
        1,
        serde_json::json!({"image_ref": 42}),
    )
    .await;
    engine.queue.submit_ready(&task).await.unwrap();

    let registry = Arc::new(ExecutorRegistry::with_defaults());
    let consumer = Arc::new(Consumer::new(engine.ctx.clone(), registry));
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(Arc::clone(&consumer).run(cancel.clone()));

    let state = wait_for_state(&pool, &task, TaskState::Error).await;
    assert_eq!(state, TaskState::Error);
    cancel.cancel();
    let _ = handle.await;

    // The build primitive never ran.
    assert_eq!(engine.build.calls.load(Ordering::SeqCst), 0);

    drop_test_db(&db_name).await;
}

/// Blocks until its context is cancelled.
struct BlockingExecutor;

#[async_trait]
impl Executor for BlockingExecutor {
    fn kind(&self) -> TaskKind {
        TaskKind::BuildContainer
    }

    fn validate_payload(&self, _: &serde_json::Value) -> Result<(), ExecError> {
        Ok(())
    }

    async fn execute(&self, ctx: &ExecContext, _: &Task) -> Result<ExecOutcome> {
        ctx.cancel.cancelled().await;
        anyhow::bail!("cancelled")
    }
}

#[tokio::test]
async fn cancel_task_covers_queued_running_and_unknown() {
    let (pool, db_name) = create_test_db().await;
    let engine = make_engine(&pool, &[], 0).await;

    let mut registry = ExecutorRegistry::new();
    registry.register(BlockingExecutor);
    let consumer = Arc::new(Consumer::new(engine.ctx.clone(), Arc::new(registry)));

    // Unknown id: "not found".
    let err = consumer.cancel_task(uuid::Uuid::now_v7()).await.unwrap_err();
    assert!(err.to_string().contains("not found"));

    // Queued (delayed) id: removed from its tier.
    let mut queued = make_task_with_trace(
        &pool,
        TraceKind::DatapackBuild,
        TaskKind::BuildContainer,
        1,
        serde_json::json!({}),
    )
    .await;
    queued.immediate = false;
    queued.execute_at = chrono::Utc::now() + chrono::Duration::hours(1);
    engine.queue.submit_delayed(&queued).await.unwrap();

    consumer.cancel_task(queued.id).await.unwrap();
    assert_eq!(queue::index_tier(&pool, queued.id).await.unwrap(), None);
    let row = task_db::get_task(&pool, queued.id).await.unwrap().unwrap();
    assert_eq!(row.state, TaskState::Cancelled);

    // Running id: the worker's context is cancelled and the task ends
    // cancelled.
    let running = make_task_with_trace(
        &pool,
        TraceKind::DatapackBuild,
        TaskKind::BuildContainer,
        1,
        serde_json::json!({}),
    )
    .await;
    engine.queue.submit_ready(&running).await.unwrap();

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(Arc::clone(&consumer).run(cancel.clone()));

    let state = wait_for_state(&pool, &running, TaskState::Running).await;
    assert_eq!(state, TaskState::Running);

    consumer.cancel_task(running.id).await.unwrap();
    let state = wait_for_state(&pool, &running, TaskState::Cancelled).await;
    assert_eq!(state, TaskState::Cancelled);

    cancel.cancel();
    let _ = handle.await;

    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn recover_orphans_requeues_limbo_tasks() {
    let (pool, db_name) = create_test_db().await;
    let engine = make_engine(&pool, &[], 0).await;

    // A task stuck in running with no queue presence: the signature of
    // a crashed worker.
    let task = make_task_with_trace(
        &pool,
        TraceKind::DatapackBuild,
        TaskKind::BuildContainer,
        1,
        serde_json::json!({}),
    )
    .await;
    task_db::upsert_task(&pool, &task).await.unwrap();
    task_db::update_task_state(&pool, task.id, TaskState::Running, "", None, None)
        .await
        .unwrap();

    let registry = Arc::new(ExecutorRegistry::with_defaults());
    let consumer = Consumer::new(engine.ctx.clone(), registry);
    let recovered = consumer.recover_orphans().await.unwrap();
    assert_eq!(recovered, 1);

    assert_eq!(
        queue::index_tier(&pool, task.id).await.unwrap(),
        Some(QueueTier::Ready)
    );
    let row = task_db::get_task(&pool, task.id).await.unwrap().unwrap();
    assert_eq!(row.state, TaskState::Pending);

    drop_test_db(&db_name).await;
}
