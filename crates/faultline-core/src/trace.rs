//! Trace aggregation.
//!
//! A trace's state is a pure function of its tasks' states and levels,
//! re-derived after every task state change. The derivation runs against
//! a snapshot and writes back under optimistic concurrency; a lost race
//! reloads and retries. Individual executors never transition the trace
//! themselves.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use faultline_db::models::{Task, TaskKind, TaskState, TraceKind, TraceState};
use faultline_db::queries::{tasks as task_db, traces as trace_db};

use crate::events::names;

/// Optimistic-update retry schedule.
const UPDATE_RETRIES: [Duration; 3] = [
    Duration::from_millis(50),
    Duration::from_millis(100),
    Duration::from_millis(150),
];

/// Per-level task counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LevelStats {
    pub total: i64,
    pub completed: i64,
    pub failed: i64,
    pub running: i64,
    pub pending: i64,
}

/// Derive `(state, last_event)` for a trace from its tasks.
///
/// Priority order:
/// 1. early termination: a completed detector result collection that
///    found nothing (and spawned no downstream algorithm runs) completes
///    a full pipeline,
/// 2. a fully-failed level fails the trace,
/// 3. a completed leaf with nothing in flight completes it,
/// 4. anything running (or any progress at all) marks it running,
/// 5. otherwise pending.
pub fn infer_trace_state(kind: TraceKind, tasks: &[Task]) -> (TraceState, Option<String>) {
    if tasks.is_empty() {
        return (TraceState::Pending, None);
    }

    let stats = level_stats(tasks);
    let leaf_level = kind.tree_height();

    // 1. Early termination: only the full pipeline can be cut short, and
    // only by the detector's result collection.
    if kind == TraceKind::FullPipeline {
        if let Some(task) = tasks.iter().find(|t| {
            t.kind == TaskKind::CollectResult
                && t.state == TaskState::Completed
                && (t.last_event == names::DATAPACK_NO_ANOMALY
                    || t.last_event == names::DATAPACK_NO_DETECTOR_DATA)
        }) {
            let downstream_runs = tasks
                .iter()
                .any(|t| t.kind == TaskKind::RunAlgorithm && t.level > task.level);
            if !downstream_runs {
                return (TraceState::Completed, Some(task.last_event.clone()));
            }
        }
    }

    // 2. A level where every task failed fails the trace.
    for (level, s) in &stats {
        if s.total > 0 && s.failed == s.total {
            let event = tasks
                .iter()
                .filter(|t| {
                    t.level == *level && !t.last_event.is_empty() && is_failed(t.state)
                })
                .map(|t| t.last_event.clone())
                .next_back()
                .unwrap_or_else(|| names::TASK_STATE_UPDATE.to_owned());
            return (TraceState::Failed, Some(event));
        }
    }

    let any_in_flight = stats.values().any(|s| s.running > 0 || s.pending > 0);
    let leaf = stats.get(&leaf_level).copied().unwrap_or_default();

    // 3. Leaf completion with nothing left in flight anywhere.
    if leaf.completed > 0 && !any_in_flight {
        let event = tasks
            .iter()
            .filter(|t| t.level == leaf_level && t.state == TaskState::Completed)
            .max_by_key(|t| completion_priority(&t.last_event))
            .map(|t| t.last_event.clone())
            .filter(|e| !e.is_empty());
        return (TraceState::Completed, event);
    }

    // 4. Still moving.
    if stats.values().any(|s| s.running > 0) {
        return (TraceState::Running, None);
    }
    if stats.values().any(|s| s.completed > 0) {
        return (TraceState::Running, None);
    }

    (TraceState::Pending, None)
}

/// Group task counts by level.
pub fn level_stats(tasks: &[Task]) -> BTreeMap<i32, LevelStats> {
    let mut stats: BTreeMap<i32, LevelStats> = BTreeMap::new();
    for task in tasks {
        let entry = stats.entry(task.level).or_default();
        entry.total += 1;
        match task.state {
            TaskState::Completed => entry.completed += 1,
            TaskState::Error | TaskState::Cancelled => entry.failed += 1,
            TaskState::Running => entry.running += 1,
            TaskState::Pending | TaskState::Rescheduled => entry.pending += 1,
        }
    }
    stats
}

fn is_failed(state: TaskState) -> bool {
    matches!(state, TaskState::Error | TaskState::Cancelled)
}

/// Rank completion events so the leaf reports the most informative one.
fn completion_priority(event: &str) -> i32 {
    match event {
        names::ALGO_RESULT_COLLECTION => 5,
        names::DATAPACK_RESULT_COLLECTION => 4,
        names::DATAPACK_NO_ANOMALY => 3,
        names::DATAPACK_NO_DETECTOR_DATA => 2,
        names::ALGO_NO_RESULT_DATA => 1,
        _ => 0,
    }
}

/// Re-derive and persist one trace's state.
///
/// Loads the trace and its tasks, infers the aggregate state, and writes
/// it back pinned to the loaded `updated_at`. A lost write reloads and
/// retries up to three times; terminal transitions also stamp
/// `ended_at`. Terminal traces are left untouched.
pub async fn aggregate(pool: &PgPool, trace_id: Uuid) -> Result<()> {
    for (attempt, delay) in std::iter::once(Duration::ZERO)
        .chain(UPDATE_RETRIES)
        .enumerate()
    {
        if delay > Duration::ZERO {
            tokio::time::sleep(delay).await;
        }

        let Some(trace) = trace_db::get_trace(pool, trace_id).await? else {
            tracing::warn!(trace_id = %trace_id, "aggregation requested for unknown trace");
            return Ok(());
        };

        if trace.state.is_terminal() {
            return Ok(());
        }

        let tasks = task_db::list_tasks_for_trace(pool, trace_id).await?;
        let (state, last_event) = infer_trace_state(trace.kind, &tasks);

        let event_changed = match (&last_event, &trace.last_event) {
            (Some(new), Some(old)) => new != old,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if state == trace.state && !event_changed {
            return Ok(());
        }

        let ended_at = state.is_terminal().then(Utc::now);
        let rows = trace_db::update_trace_state(
            pool,
            trace_id,
            state,
            last_event.as_deref(),
            trace.updated_at,
            ended_at,
        )
        .await?;

        if rows > 0 {
            tracing::info!(
                trace_id = %trace_id,
                state = %state,
                last_event = last_event.as_deref().unwrap_or(""),
                "trace state updated"
            );
            return Ok(());
        }

        tracing::debug!(
            trace_id = %trace_id,
            attempt = attempt,
            "trace update lost optimistic race, retrying"
        );
    }

    tracing::warn!(trace_id = %trace_id, "trace aggregation gave up after retries");
    Ok(())
}

/// Fire-and-forget aggregation, used after task state changes.
pub fn aggregate_async(pool: PgPool, trace_id: Uuid) {
    tokio::spawn(async move {
        if let Err(e) = aggregate(&pool, trace_id).await {
            tracing::warn!(trace_id = %trace_id, error = %e, "trace aggregation failed");
        }
    });
}
