//! Query functions for the `tasks` table -- the persisted record of every
//! queue task.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Task, TaskState};

/// Insert or replace a task row.
///
/// Producers call this when a task is first written to the queue;
/// re-submission of the same id (retry, reschedule) refreshes the row.
pub async fn upsert_task(pool: &PgPool, task: &Task) -> Result<()> {
    sqlx::query(
        "INSERT INTO tasks (id, kind, state, payload, immediate, execute_at, \
                            cron_expr, max_attempts, backoff_secs, restart_num, \
                            parent_task_id, trace_id, group_id, project_id, \
                            user_id, sequence, level, trace_carrier, task_carrier, \
                            error_log, created_at, started_at, completed_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, \
                 $15, $16, $17, $18, $19, $20, $21, $22, $23) \
         ON CONFLICT (id) DO UPDATE \
         SET state = EXCLUDED.state, \
             payload = EXCLUDED.payload, \
             execute_at = EXCLUDED.execute_at, \
             restart_num = EXCLUDED.restart_num, \
             error_log = EXCLUDED.error_log",
    )
    .bind(task.id)
    .bind(task.kind)
    .bind(task.state)
    .bind(&task.payload)
    .bind(task.immediate)
    .bind(task.execute_at)
    .bind(&task.cron_expr)
    .bind(task.max_attempts)
    .bind(task.backoff_secs)
    .bind(task.restart_num)
    .bind(task.parent_task_id)
    .bind(task.trace_id)
    .bind(task.group_id)
    .bind(&task.project_id)
    .bind(&task.user_id)
    .bind(task.sequence)
    .bind(task.level)
    .bind(&task.trace_carrier)
    .bind(&task.task_carrier)
    .bind(&task.error_log)
    .bind(task.created_at)
    .bind(task.started_at)
    .bind(task.completed_at)
    .execute(pool)
    .await
    .context("failed to upsert task")?;

    Ok(())
}

/// Fetch a single task by ID.
pub async fn get_task(pool: &PgPool, id: Uuid) -> Result<Option<Task>> {
    let task = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch task")?;

    Ok(task)
}

/// List all tasks belonging to a trace, in creation order.
pub async fn list_tasks_for_trace(pool: &PgPool, trace_id: Uuid) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks WHERE trace_id = $1 ORDER BY id ASC",
    )
    .bind(trace_id)
    .fetch_all(pool)
    .await
    .context("failed to list tasks for trace")?;

    Ok(tasks)
}

/// Update a task's state and latest event, guarding against reopening
/// terminal tasks.
///
/// `started_at` / `completed_at` are only overwritten when provided; the
/// event name only when non-empty. Returns the number of rows affected
/// (0 when the task is missing or already terminal).
pub async fn update_task_state(
    pool: &PgPool,
    id: Uuid,
    state: TaskState,
    event: &str,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET state = $1, \
             last_event = CASE WHEN $2 = '' THEN last_event ELSE $2 END, \
             started_at = COALESCE($3, started_at), \
             completed_at = COALESCE($4, completed_at) \
         WHERE id = $5 \
           AND state NOT IN ('completed', 'error', 'cancelled')",
    )
    .bind(state)
    .bind(event)
    .bind(started_at)
    .bind(completed_at)
    .bind(id)
    .execute(pool)
    .await
    .context("failed to update task state")?;

    Ok(result.rows_affected())
}

/// Increment the restart counter for a retried task. Optimistically
/// locked on the current value.
pub async fn increment_restart_num(
    pool: &PgPool,
    id: Uuid,
    current: i32,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks SET restart_num = restart_num + 1 \
         WHERE id = $1 AND restart_num = $2",
    )
    .bind(id)
    .bind(current)
    .execute(pool)
    .await
    .context("failed to increment restart counter")?;

    Ok(result.rows_affected())
}

/// Append one entry to a task's error log (a JSON array).
pub async fn append_error(pool: &PgPool, id: Uuid, error: &str) -> Result<()> {
    sqlx::query(
        "UPDATE tasks \
         SET error_log = error_log || jsonb_build_array($2::text) \
         WHERE id = $1",
    )
    .bind(id)
    .bind(error)
    .execute(pool)
    .await
    .context("failed to append to task error log")?;

    Ok(())
}

/// Reset tasks a crashed process left in `running` back to `pending` and
/// return them so the caller can re-submit them to the ready tier.
///
/// Restart recovery: a worker that dies mid-execution leaves its task in
/// limbo; nothing else will ever touch it.
pub async fn reset_orphaned_running(pool: &PgPool) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "UPDATE tasks \
         SET state = 'pending' \
         WHERE state = 'running' \
           AND id NOT IN (SELECT task_id FROM queue_index) \
         RETURNING *",
    )
    .fetch_all(pool)
    .await
    .context("failed to reset orphaned tasks")?;

    Ok(tasks)
}

/// Per-state counts for one trace, for status displays.
#[derive(Debug, Clone, Default)]
pub struct TraceProgress {
    pub pending: i64,
    pub running: i64,
    pub completed: i64,
    pub error: i64,
    pub rescheduled: i64,
    pub cancelled: i64,
    pub total: i64,
}

/// Count a trace's tasks by state.
pub async fn get_trace_progress(pool: &PgPool, trace_id: Uuid) -> Result<TraceProgress> {
    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT state::text, COUNT(*) as cnt \
         FROM tasks \
         WHERE trace_id = $1 \
         GROUP BY state",
    )
    .bind(trace_id)
    .fetch_all(pool)
    .await
    .context("failed to get trace progress")?;

    let mut progress = TraceProgress::default();
    for (state, count) in &rows {
        match state.as_str() {
            "pending" => progress.pending = *count,
            "running" => progress.running = *count,
            "completed" => progress.completed = *count,
            "error" => progress.error = *count,
            "rescheduled" => progress.rescheduled = *count,
            "cancelled" => progress.cancelled = *count,
            _ => {}
        }
        progress.total += count;
    }
    Ok(progress)
}
