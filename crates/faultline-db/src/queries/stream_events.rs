//! Query functions for the per-trace stream log.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::StreamEvent;

/// How many events each trace's stream retains.
pub const STREAM_RETENTION: i64 = 1000;

/// Fields for a new stream entry.
#[derive(Debug, Clone)]
pub struct NewStreamEvent<'a> {
    pub trace_id: Uuid,
    pub task_id: Uuid,
    pub task_kind: &'a str,
    pub event: &'a str,
    pub payload: serde_json::Value,
    pub file: &'a str,
    pub line: i32,
    pub func: &'a str,
}

/// Append an event to a trace's stream and trim the stream to the
/// retention bound.
pub async fn append(pool: &PgPool, event: &NewStreamEvent<'_>) -> Result<i64> {
    let mut tx = pool.begin().await?;

    let id: (i64,) = sqlx::query_as(
        "INSERT INTO stream_events \
             (trace_id, task_id, task_kind, event, payload, file, line, func) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
         RETURNING id",
    )
    .bind(event.trace_id)
    .bind(event.task_id)
    .bind(event.task_kind)
    .bind(event.event)
    .bind(&event.payload)
    .bind(event.file)
    .bind(event.line)
    .bind(event.func)
    .fetch_one(&mut *tx)
    .await
    .context("failed to append stream event")?;

    // Keep only the newest STREAM_RETENTION entries for this trace.
    sqlx::query(
        "DELETE FROM stream_events \
         WHERE trace_id = $1 AND id NOT IN ( \
             SELECT id FROM stream_events \
             WHERE trace_id = $1 \
             ORDER BY id DESC \
             LIMIT $2 \
         )",
    )
    .bind(event.trace_id)
    .bind(STREAM_RETENTION)
    .execute(&mut *tx)
    .await
    .context("failed to trim stream")?;

    tx.commit().await?;
    Ok(id.0)
}

/// Read a trace's stream after the given id (0 for everything retained),
/// oldest first.
pub async fn read_after(
    pool: &PgPool,
    trace_id: Uuid,
    after_id: i64,
    limit: i64,
) -> Result<Vec<StreamEvent>> {
    let events = sqlx::query_as::<_, StreamEvent>(
        "SELECT * FROM stream_events \
         WHERE trace_id = $1 AND id > $2 \
         ORDER BY id ASC \
         LIMIT $3",
    )
    .bind(trace_id)
    .bind(after_id)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("failed to read stream events")?;

    Ok(events)
}
