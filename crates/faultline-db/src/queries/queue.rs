//! Queue tier queries: ready list, delayed sorted set, dead-letter set,
//! tier index, and the shared concurrency counter.
//!
//! Every read-modify-write runs in a single transaction. Concurrent
//! promoters and consumers coordinate through `FOR UPDATE SKIP LOCKED`,
//! so a task is only ever handed out once even when several processes
//! share the store.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{QueueTier, Task};

/// Append a serialised task to the ready list and point the index at it.
pub async fn submit_ready(pool: &PgPool, task: &Task) -> Result<()> {
    let body = serde_json::to_value(task).context("failed to serialise task")?;

    let mut tx = pool.begin().await?;

    sqlx::query("INSERT INTO queue_ready (task_id, task) VALUES ($1, $2)")
        .bind(task.id)
        .bind(&body)
        .execute(&mut *tx)
        .await
        .context("failed to push task to ready list")?;

    upsert_index(&mut tx, task.id, QueueTier::Ready).await?;

    tx.commit().await?;
    Ok(())
}

/// Insert a serialised task into the delayed set, scored by `execute_at`.
///
/// Re-submitting the same task id replaces the old entry (cron
/// rescheduling relies on this).
pub async fn submit_delayed(
    pool: &PgPool,
    task: &Task,
    execute_at: DateTime<Utc>,
) -> Result<()> {
    let body = serde_json::to_value(task).context("failed to serialise task")?;

    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO queue_delayed (task_id, task, execute_at) \
         VALUES ($1, $2, $3) \
         ON CONFLICT (task_id) DO UPDATE \
         SET task = EXCLUDED.task, execute_at = EXCLUDED.execute_at",
    )
    .bind(task.id)
    .bind(&body)
    .bind(execute_at)
    .execute(&mut *tx)
    .await
    .context("failed to insert task into delayed set")?;

    upsert_index(&mut tx, task.id, QueueTier::Delayed).await?;

    tx.commit().await?;
    Ok(())
}

/// Atomically move every delayed task whose score is due to the ready
/// list and return them.
///
/// The whole move is one transaction, so a crash leaves each task either
/// in its old placement or its new one, never both and never neither.
/// `SKIP LOCKED` lets two processes promote overlapping windows without
/// double-promoting a task.
pub async fn promote_due(pool: &PgPool, now: DateTime<Utc>) -> Result<Vec<Task>> {
    let mut tx = pool.begin().await?;

    let rows: Vec<(Uuid, serde_json::Value)> = sqlx::query_as(
        "DELETE FROM queue_delayed \
         WHERE task_id IN ( \
             SELECT task_id FROM queue_delayed \
             WHERE execute_at <= $1 \
             ORDER BY execute_at \
             FOR UPDATE SKIP LOCKED \
         ) \
         RETURNING task_id, task",
    )
    .bind(now)
    .fetch_all(&mut *tx)
    .await
    .context("failed to collect due delayed tasks")?;

    let mut promoted = Vec::with_capacity(rows.len());
    for (task_id, body) in rows {
        sqlx::query("INSERT INTO queue_ready (task_id, task) VALUES ($1, $2)")
            .bind(task_id)
            .bind(&body)
            .execute(&mut *tx)
            .await
            .context("failed to push promoted task to ready list")?;

        upsert_index(&mut tx, task_id, QueueTier::Ready).await?;

        let task: Task = serde_json::from_value(body)
            .with_context(|| format!("corrupt queue entry for task {task_id}"))?;
        promoted.push(task);
    }

    tx.commit().await?;
    Ok(promoted)
}

/// Pop the oldest ready task, if any.
///
/// Non-blocking; the blocking-with-timeout variant lives in the core
/// queue facade as a poll loop around this.
pub async fn pop_ready(pool: &PgPool) -> Result<Option<Task>> {
    let mut tx = pool.begin().await?;

    let row: Option<(Uuid, serde_json::Value)> = sqlx::query_as(
        "DELETE FROM queue_ready \
         WHERE seq = ( \
             SELECT seq FROM queue_ready \
             ORDER BY seq \
             FOR UPDATE SKIP LOCKED \
             LIMIT 1 \
         ) \
         RETURNING task_id, task",
    )
    .fetch_optional(&mut *tx)
    .await
    .context("failed to pop ready task")?;

    let Some((task_id, body)) = row else {
        tx.commit().await?;
        return Ok(None);
    };

    sqlx::query("DELETE FROM queue_index WHERE task_id = $1")
        .bind(task_id)
        .execute(&mut *tx)
        .await
        .context("failed to clear index entry for popped task")?;

    tx.commit().await?;

    let task: Task = serde_json::from_value(body)
        .with_context(|| format!("corrupt queue entry for task {task_id}"))?;
    Ok(Some(task))
}

/// Move a task to the dead-letter set, scored by enqueue time.
pub async fn move_to_dead(pool: &PgPool, task: &Task, score: DateTime<Utc>) -> Result<()> {
    let body = serde_json::to_value(task).context("failed to serialise task")?;

    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO queue_dead (task_id, task, enqueued_at) \
         VALUES ($1, $2, $3) \
         ON CONFLICT (task_id) DO UPDATE \
         SET task = EXCLUDED.task, enqueued_at = EXCLUDED.enqueued_at",
    )
    .bind(task.id)
    .bind(&body)
    .bind(score)
    .execute(&mut *tx)
    .await
    .context("failed to insert task into dead-letter set")?;

    upsert_index(&mut tx, task.id, QueueTier::Dead).await?;

    tx.commit().await?;
    Ok(())
}

/// Remove a task from whichever tier currently holds it, consulting the
/// index, and delete the index entry. Fails with "not found" when the
/// task is in no tier.
pub async fn remove(pool: &PgPool, task_id: Uuid) -> Result<QueueTier> {
    let mut tx = pool.begin().await?;

    let tier: Option<(QueueTier,)> =
        sqlx::query_as("SELECT tier FROM queue_index WHERE task_id = $1 FOR UPDATE")
            .bind(task_id)
            .fetch_optional(&mut *tx)
            .await
            .context("failed to look up queue index")?;

    let Some((tier,)) = tier else {
        bail!("task {task_id} not found in queue index");
    };

    let stmt = match tier {
        QueueTier::Ready => "DELETE FROM queue_ready WHERE task_id = $1",
        QueueTier::Delayed => "DELETE FROM queue_delayed WHERE task_id = $1",
        QueueTier::Dead => "DELETE FROM queue_dead WHERE task_id = $1",
    };
    sqlx::query(stmt)
        .bind(task_id)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("failed to remove task from {tier} tier"))?;

    sqlx::query("DELETE FROM queue_index WHERE task_id = $1")
        .bind(task_id)
        .execute(&mut *tx)
        .await
        .context("failed to delete index entry")?;

    tx.commit().await?;
    Ok(tier)
}

/// Which tier currently holds a task, per the index.
pub async fn index_tier(pool: &PgPool, task_id: Uuid) -> Result<Option<QueueTier>> {
    let tier: Option<(QueueTier,)> =
        sqlx::query_as("SELECT tier FROM queue_index WHERE task_id = $1")
            .bind(task_id)
            .fetch_optional(pool)
            .await
            .context("failed to read queue index")?;
    Ok(tier.map(|(t,)| t))
}

/// List dead-lettered tasks, oldest first.
pub async fn list_dead(pool: &PgPool, limit: i64) -> Result<Vec<Task>> {
    let rows: Vec<(serde_json::Value,)> = sqlx::query_as(
        "SELECT task FROM queue_dead ORDER BY enqueued_at ASC LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("failed to list dead-letter tasks")?;

    rows.into_iter()
        .map(|(body,)| serde_json::from_value(body).context("corrupt dead-letter entry"))
        .collect()
}

/// Tier lengths, for status displays.
pub async fn tier_lengths(pool: &PgPool) -> Result<(i64, i64, i64)> {
    let ready: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM queue_ready")
        .fetch_one(pool)
        .await
        .context("failed to count ready tier")?;
    let delayed: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM queue_delayed")
        .fetch_one(pool)
        .await
        .context("failed to count delayed tier")?;
    let dead: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM queue_dead")
        .fetch_one(pool)
        .await
        .context("failed to count dead tier")?;
    Ok((ready.0, delayed.0, dead.0))
}

// -----------------------------------------------------------------------
// Concurrency slots
// -----------------------------------------------------------------------

/// Try to take one concurrency slot. Returns false when the counter is
/// at its cap. The conditional UPDATE makes the check-and-increment
/// atomic across processes.
pub async fn acquire_slot(pool: &PgPool) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE concurrency_slots \
         SET in_use = in_use + 1 \
         WHERE id = 1 AND in_use < max_slots",
    )
    .execute(pool)
    .await
    .context("failed to acquire concurrency slot")?;

    Ok(result.rows_affected() == 1)
}

/// Release one concurrency slot. Floors at zero.
pub async fn release_slot(pool: &PgPool) -> Result<()> {
    sqlx::query(
        "UPDATE concurrency_slots \
         SET in_use = GREATEST(in_use - 1, 0) \
         WHERE id = 1",
    )
    .execute(pool)
    .await
    .context("failed to release concurrency slot")?;
    Ok(())
}

/// Current (in_use, max_slots).
pub async fn slot_usage(pool: &PgPool) -> Result<(i32, i32)> {
    let row: (i32, i32) =
        sqlx::query_as("SELECT in_use, max_slots FROM concurrency_slots WHERE id = 1")
            .fetch_one(pool)
            .await
            .context("failed to read concurrency slots")?;
    Ok(row)
}

/// Configure the concurrency cap.
pub async fn set_max_slots(pool: &PgPool, max_slots: i32) -> Result<()> {
    sqlx::query("UPDATE concurrency_slots SET max_slots = $1 WHERE id = 1")
        .bind(max_slots)
        .execute(pool)
        .await
        .context("failed to set concurrency cap")?;
    Ok(())
}

// -----------------------------------------------------------------------

async fn upsert_index(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    task_id: Uuid,
    tier: QueueTier,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO queue_index (task_id, tier) VALUES ($1, $2) \
         ON CONFLICT (task_id) DO UPDATE SET tier = EXCLUDED.tier",
    )
    .bind(task_id)
    .bind(tier)
    .execute(&mut **tx)
    .await
    .context("failed to update queue index")?;
    Ok(())
}
