//! Task consumer: concurrency gate, dispatch, retry, cancellation.
//!
//! The main loop takes a shared concurrency slot, blocks on the ready
//! list, and hands each task to a worker. Workers dispatch through the
//! executor registry and drive the retry loop; contention exits
//! reschedule without spending an attempt, exhausted tasks land in the
//! dead-letter tier.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use futures::FutureExt;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use faultline_db::models::{Task, TaskState};
use faultline_db::queries::tasks as task_db;

use crate::backoff::retry_backoff;
use crate::carrier::TraceCarrier;
use crate::error::{Classified, classify};
use crate::events::names;
use crate::executor::{ExecContext, ExecOutcome, ExecutorRegistry, update_task_state};

/// How long one `get_ready` call blocks.
const READY_WAIT: Duration = Duration::from_secs(30);

/// Pause before re-trying a missed concurrency slot.
const SLOT_RETRY_SLEEP: Duration = Duration::from_millis(500);

/// The consumer: one per process.
pub struct Consumer {
    ctx: ExecContext,
    registry: Arc<ExecutorRegistry>,
    /// Cancellation functions of in-flight workers, by task id.
    cancels: Arc<RwLock<HashMap<Uuid, CancellationToken>>>,
}

impl Consumer {
    pub fn new(ctx: ExecContext, registry: Arc<ExecutorRegistry>) -> Self {
        Self {
            ctx,
            registry,
            cancels: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Run the consume loop until cancelled.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                tracing::info!("consumer stopped");
                return;
            }

            // 1. Concurrency gate.
            let slot = match self.ctx.queue.acquire_slot().await {
                Ok(got) => got,
                Err(e) => {
                    tracing::warn!(error = %e, "slot acquisition failed");
                    false
                }
            };
            if !slot {
                tokio::select! {
                    _ = tokio::time::sleep(SLOT_RETRY_SLEEP) => {}
                    _ = cancel.cancelled() => {}
                }
                continue;
            }

            // 2. Blocking pop.
            let task = tokio::select! {
                popped = self.ctx.queue.get_ready(READY_WAIT) => popped,
                _ = cancel.cancelled() => Ok(None),
            };
            let task = match task {
                Ok(Some(task)) => task,
                Ok(None) => {
                    let _ = self.ctx.queue.release_slot().await;
                    continue;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "ready pop failed");
                    let _ = self.ctx.queue.release_slot().await;
                    tokio::select! {
                        _ = tokio::time::sleep(SLOT_RETRY_SLEEP) => {}
                        _ = cancel.cancelled() => {}
                    }
                    continue;
                }
            };

            // 3. Fire-and-forget worker; the slot is released when it
            // exits, even if the executor panics.
            let consumer = Arc::clone(&self);
            tokio::spawn(async move {
                let worker = consumer.clone().execute_task_with_retry(task.clone());
                if let Err(payload) = AssertUnwindSafe(worker).catch_unwind().await {
                    let msg = payload
                        .downcast_ref::<&str>()
                        .map(|s| (*s).to_owned())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_owned());
                    tracing::error!(task_id = %task.id, panic = %msg, "worker panicked");

                    consumer.cancels.write().await.remove(&task.id);
                    let ctx = consumer.ctx.for_task(CancellationToken::new());
                    consumer
                        .fail_task(&ctx, &task, &format!("worker panicked: {msg}"))
                        .await;
                }
                if let Err(e) = consumer.ctx.queue.release_slot().await {
                    tracing::warn!(error = %e, "slot release failed");
                }
            });
        }
    }

    /// Dispatch one task with retries, under its own cancellation
    /// scope.
    async fn execute_task_with_retry(self: Arc<Self>, task: Task) {
        let trace_carrier = TraceCarrier::extract_or_create(&task);
        let span = tracing::info_span!(
            "task",
            task_id = %task.id,
            trace_id = %trace_carrier.trace_id,
            group_id = %trace_carrier.group_id,
            kind = %task.kind,
        );

        let cancel = CancellationToken::new();
        self.cancels.write().await.insert(task.id, cancel.clone());

        self.clone()
            .run_attempts(task.clone(), cancel)
            .instrument(span)
            .await;

        self.cancels.write().await.remove(&task.id);
    }

    async fn run_attempts(self: Arc<Self>, mut task: Task, cancel: CancellationToken) {
        let ctx = self.ctx.for_task(cancel.clone());

        let Some(executor) = self.registry.get(task.kind) else {
            tracing::error!(kind = %task.kind, "no executor registered");
            self.fail_task(&ctx, &task, "no executor registered").await;
            return;
        };

        // Structural validation up front: a malformed payload never
        // earns a retry.
        if let Err(e) = executor.validate_payload(&task.payload) {
            tracing::error!(error = %e, "payload validation failed");
            self.fail_task(&ctx, &task, &e.to_string()).await;
            return;
        }

        if let Err(e) =
            update_task_state(&ctx, &task, TaskState::Running, names::TASK_STATE_UPDATE).await
        {
            tracing::error!(error = %e, "failed to mark task running");
        }

        let mut last_error = String::new();

        for attempt in 0..=task.max_attempts {
            if attempt > 0 {
                // Cancellation-aware retry backoff.
                tokio::select! {
                    _ = tokio::time::sleep(retry_backoff(task.backoff_secs)) => {}
                    _ = cancel.cancelled() => {}
                }
                if !cancel.is_cancelled() {
                    if let Err(e) =
                        task_db::increment_restart_num(&ctx.pool, task.id, task.restart_num)
                            .await
                    {
                        tracing::warn!(error = %e, "failed to bump restart counter");
                    }
                    task.restart_num += 1;
                }
            }

            if cancel.is_cancelled() {
                self.cancelled_exit(&ctx, &task).await;
                return;
            }

            match executor.execute(&ctx, &task).await {
                Ok(ExecOutcome::Completed { event }) => {
                    tracing::info!(event = event, attempt = attempt, "task completed");
                    return;
                }
                Ok(ExecOutcome::InFlight { event }) => {
                    tracing::info!(
                        event = event,
                        attempt = attempt,
                        "task handed to cluster controller"
                    );
                    return;
                }
                Err(e) => {
                    if cancel.is_cancelled() {
                        self.cancelled_exit(&ctx, &task).await;
                        return;
                    }

                    match classify(&e) {
                        Classified::Rescheduled(delay) => {
                            // The executor already re-queued the task.
                            if let Err(err) = task_db::update_task_state(
                                &ctx.pool,
                                task.id,
                                TaskState::Rescheduled,
                                names::TASK_RESCHEDULED,
                                None,
                                None,
                            )
                            .await
                            {
                                tracing::warn!(error = %err, "failed to mark task rescheduled");
                            }
                            ctx.publisher
                                .publish(
                                    &task,
                                    names::TASK_RESCHEDULED,
                                    serde_json::json!({
                                        "delay_secs": delay.as_secs(),
                                    }),
                                )
                                .await;
                            tracing::info!(
                                delay_secs = delay.as_secs(),
                                "task rescheduled on contention"
                            );
                            return;
                        }
                        Classified::NoRetry => {
                            tracing::error!(error = %e, "task failed terminally");
                            last_error = format!("{e:#}");
                            break;
                        }
                        Classified::Retry => {
                            last_error = format!("{e:#}");
                            tracing::warn!(
                                error = %e,
                                attempt = attempt,
                                max_attempts = task.max_attempts,
                                "task attempt failed"
                            );
                            if let Err(err) =
                                task_db::append_error(&ctx.pool, task.id, &last_error).await
                            {
                                tracing::warn!(error = %err, "failed to append error log");
                            }
                            if attempt < task.max_attempts {
                                ctx.publisher
                                    .publish(
                                        &task,
                                        names::TASK_RETRY_STATUS,
                                        serde_json::json!({
                                            "attempt": attempt,
                                            "max_attempts": task.max_attempts,
                                            "error": last_error,
                                        }),
                                    )
                                    .await;
                            }
                        }
                    }
                }
            }
        }

        self.fail_task(&ctx, &task, &last_error).await;
    }

    /// Terminal failure: dead-letter the task and mark it errored.
    async fn fail_task(&self, ctx: &ExecContext, task: &Task, error: &str) {
        if let Err(e) = ctx.queue.move_to_dead(task).await {
            tracing::error!(error = %e, "failed to dead-letter task");
        }
        if let Err(e) =
            update_task_state(ctx, task, TaskState::Error, names::TASK_DEAD_LETTERED).await
        {
            tracing::error!(error = %e, "failed to mark task errored");
        }
        ctx.publisher
            .publish(
                task,
                names::TASK_DEAD_LETTERED,
                serde_json::json!({ "error": error }),
            )
            .await;
    }

    async fn cancelled_exit(&self, ctx: &ExecContext, task: &Task) {
        if let Err(e) =
            update_task_state(ctx, task, TaskState::Cancelled, names::TASK_CANCELLED).await
        {
            tracing::warn!(error = %e, "failed to mark task cancelled");
        }
        ctx.publisher
            .publish(task, names::TASK_CANCELLED, serde_json::json!({}))
            .await;
        tracing::info!("task cancelled");
    }

    /// Cancel a task wherever it currently is.
    ///
    /// A running task has its worker context cancelled; a queued task is
    /// removed from its tier (and its index entry deleted) and marked
    /// cancelled. Unknown ids fail with "not found".
    pub async fn cancel_task(&self, task_id: Uuid) -> Result<()> {
        let was_running = {
            let cancels = self.cancels.read().await;
            match cancels.get(&task_id) {
                Some(token) => {
                    token.cancel();
                    true
                }
                None => false,
            }
        };

        let was_queued = match self.ctx.queue.remove(task_id).await {
            Ok(tier) => {
                tracing::info!(task_id = %task_id, tier = %tier, "cancelled queued task");
                task_db::update_task_state(
                    &self.ctx.pool,
                    task_id,
                    TaskState::Cancelled,
                    names::TASK_CANCELLED,
                    None,
                    None,
                )
                .await
                .context("failed to mark removed task cancelled")?;
                true
            }
            Err(_) => false,
        };

        if !was_running && !was_queued {
            bail!("task {task_id} not found");
        }
        Ok(())
    }

    /// Restart recovery: re-submit tasks a dead process left `running`.
    pub async fn recover_orphans(&self) -> Result<usize> {
        let orphans = task_db::reset_orphaned_running(&self.ctx.pool).await?;
        let count = orphans.len();
        for mut task in orphans {
            tracing::warn!(task_id = %task.id, kind = %task.kind, "re-queueing orphaned task");
            task.state = TaskState::Pending;
            self.ctx.queue.submit_ready(&task).await?;
        }
        Ok(count)
    }
}
