//! Executors: one per task kind.
//!
//! The consumer stays kind-agnostic; it resolves the executor for a
//! task's kind from the [`ExecutorRegistry`] and runs it. Each executor
//! implements one pipeline step against the shared [`ExecContext`].
//!
//! Shared discipline: state updates go through [`update_task_state`]
//! (database row plus a `task_state_update` stream event), successor
//! tasks are enqueued only after the current task's terminal state is
//! visible, and failures come back as classified [`ExecError`]s for the
//! consumer's retry loop.

pub mod build_container;
pub mod build_datapack;
pub mod collect_result;
pub mod fault_injection;
pub mod payloads;
pub mod primitives;
pub mod registry;
pub mod restart_pedestal;
pub mod run_algorithm;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use faultline_db::models::{Task, TaskKind, TaskState};
use faultline_db::queries::tasks as task_db;

use crate::carrier::{TaskCarrier, TraceCarrier};
use crate::cluster::api::ClusterApi;
use crate::config::EngineConfig;
use crate::error::ExecError;
use crate::events::{EventPublisher, names};
use crate::monitor::NamespaceMonitor;
use crate::queue::QueueStore;
use crate::ratelimit::RateLimiter;
use crate::trace;

pub use primitives::{BuildPrimitive, PedestalInstaller};
pub use registry::ExecutorRegistry;

/// Everything an executor needs. Cloned per dispatched task so each
/// execution carries its own cancellation token.
#[derive(Clone)]
pub struct ExecContext {
    pub pool: PgPool,
    pub queue: QueueStore,
    pub monitor: Arc<NamespaceMonitor>,
    pub limiter: Arc<RateLimiter>,
    pub publisher: EventPublisher,
    pub cluster: Arc<dyn ClusterApi>,
    pub builder: Arc<dyn BuildPrimitive>,
    pub installer: Arc<dyn PedestalInstaller>,
    pub config: Arc<EngineConfig>,
    /// This execution's cancellation token (a child of the trace scope).
    pub cancel: CancellationToken,
}

impl ExecContext {
    /// Same context with a fresh cancellation token for one task.
    pub fn for_task(&self, cancel: CancellationToken) -> Self {
        let mut ctx = self.clone();
        ctx.cancel = cancel;
        ctx
    }
}

/// How an execution ended, short of an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutcome {
    /// The step finished; the consumer marks the task completed and
    /// publishes `event`.
    Completed { event: &'static str },
    /// The step submitted a cluster resource; the task stays `running`
    /// and the cluster controller finishes it later.
    InFlight { event: &'static str },
}

/// One pipeline step.
#[async_trait]
pub trait Executor: Send + Sync {
    /// The task kind this executor handles.
    fn kind(&self) -> TaskKind;

    /// Cheap structural validation, run before dispatch. A failure here
    /// is a parse error and is never retried.
    fn validate_payload(&self, payload: &serde_json::Value) -> Result<(), ExecError>;

    /// Run the step.
    async fn execute(&self, ctx: &ExecContext, task: &Task) -> Result<ExecOutcome>;
}

// Compile-time assertion: Executor must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn Executor) {}
};

/// Write a task's state and stamp its latest event, then publish a
/// `task_state_update` stream event and kick the trace aggregator.
///
/// Returns whether the write landed; terminal tasks are never reopened,
/// so a false return means someone else already finished this task.
pub async fn update_task_state(
    ctx: &ExecContext,
    task: &Task,
    state: TaskState,
    event: &str,
) -> Result<bool> {
    transition_task(&ctx.pool, &ctx.publisher, task, state, event).await
}

/// [`update_task_state`] for callers outside an executor context (the
/// cluster controller).
pub async fn transition_task(
    pool: &PgPool,
    publisher: &EventPublisher,
    task: &Task,
    state: TaskState,
    event: &str,
) -> Result<bool> {
    let now = Utc::now();
    let started_at = (state == TaskState::Running).then_some(now);
    let completed_at = state.is_terminal().then_some(now);

    let rows =
        task_db::update_task_state(pool, task.id, state, event, started_at, completed_at).await?;
    if rows == 0 {
        return Ok(false);
    }

    publisher
        .publish(
            task,
            names::TASK_STATE_UPDATE,
            serde_json::json!({ "state": state.to_string(), "event": event }),
        )
        .await;

    trace::aggregate_async(pool.clone(), task.trace_id);
    Ok(true)
}

/// Build a successor task one level below `parent`, inheriting its
/// identifiers, carriers, and retry policy.
pub fn child_task(
    parent: &Task,
    kind: TaskKind,
    payload: serde_json::Value,
    execute_at: chrono::DateTime<Utc>,
    sequence: i32,
) -> Task {
    let now = Utc::now();
    let trace_carrier = TraceCarrier::extract_or_create(parent);
    let mut task = Task {
        id: Uuid::now_v7(),
        kind,
        state: TaskState::Pending,
        payload,
        immediate: execute_at <= now,
        execute_at,
        cron_expr: None,
        max_attempts: parent.max_attempts,
        backoff_secs: parent.backoff_secs,
        restart_num: 0,
        parent_task_id: Some(parent.id),
        trace_id: parent.trace_id,
        group_id: parent.group_id,
        project_id: parent.project_id.clone(),
        user_id: parent.user_id.clone(),
        sequence,
        level: parent.level + 1,
        trace_carrier: serde_json::to_value(&trace_carrier).unwrap_or_default(),
        task_carrier: serde_json::Value::Null,
        error_log: serde_json::json!([]),
        last_event: String::new(),
        created_at: now,
        started_at: None,
        completed_at: None,
    };

    let task_carrier = TaskCarrier::for_task(&task);
    task.task_carrier = serde_json::to_value(&task_carrier).unwrap_or_default();
    task
}

/// Re-queue a contended task with the given delay and surface the
/// contention to the consumer.
///
/// The task goes back to the delayed tier in `rescheduled` state with
/// its restart counter bumped, so the next contention backs off further.
pub async fn reschedule_contended(
    ctx: &ExecContext,
    task: &Task,
    delay: Duration,
    reason: &str,
) -> Result<ExecOutcome> {
    let mut requeued = task.clone();
    requeued.state = TaskState::Rescheduled;
    requeued.restart_num = task.restart_num + 1;
    requeued.immediate = false;
    requeued.execute_at = Utc::now() + chrono::Duration::from_std(delay)?;

    ctx.queue.submit_delayed(&requeued).await?;

    tracing::info!(
        task_id = %task.id,
        trace_id = %task.trace_id,
        delay_secs = delay.as_secs(),
        reason = reason,
        "task rescheduled on resource contention"
    );

    Err(ExecError::Contention(delay).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_task;

    #[test]
    fn child_task_inherits_lineage() {
        let parent = sample_task();
        let child = child_task(
            &parent,
            TaskKind::FaultInjection,
            serde_json::json!({"namespace": "ts0"}),
            Utc::now() + chrono::Duration::minutes(5),
            3,
        );

        assert_eq!(child.parent_task_id, Some(parent.id));
        assert_eq!(child.trace_id, parent.trace_id);
        assert_eq!(child.group_id, parent.group_id);
        assert_eq!(child.level, parent.level + 1);
        assert_eq!(child.sequence, 3);
        assert!(!child.immediate);
        assert_eq!(child.restart_num, 0);

        let carrier: TaskCarrier =
            serde_json::from_value(child.task_carrier.clone()).unwrap();
        assert_eq!(carrier.task_id, child.id.to_string());
        assert_eq!(carrier.parent_task_id, parent.id.to_string());
    }

    #[test]
    fn child_task_due_now_is_immediate() {
        let parent = sample_task();
        let child = child_task(
            &parent,
            TaskKind::BuildDatapack,
            serde_json::json!({}),
            Utc::now() - chrono::Duration::seconds(1),
            0,
        );
        assert!(child.immediate);
    }
}
