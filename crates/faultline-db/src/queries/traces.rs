//! Query functions for the `traces` table.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Trace, TraceKind, TraceState};

/// Insert a new trace row in `pending` state.
pub async fn insert_trace(
    pool: &PgPool,
    id: Uuid,
    kind: TraceKind,
    group_id: Uuid,
    project_id: &str,
    user_id: &str,
) -> Result<Trace> {
    let trace = sqlx::query_as::<_, Trace>(
        "INSERT INTO traces (id, kind, group_id, project_id, user_id) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING *",
    )
    .bind(id)
    .bind(kind)
    .bind(group_id)
    .bind(project_id)
    .bind(user_id)
    .fetch_one(pool)
    .await
    .context("failed to insert trace")?;

    Ok(trace)
}

/// Fetch a single trace by ID.
pub async fn get_trace(pool: &PgPool, id: Uuid) -> Result<Option<Trace>> {
    let trace = sqlx::query_as::<_, Trace>("SELECT * FROM traces WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch trace")?;

    Ok(trace)
}

/// List all traces sharing a group, in creation order.
pub async fn list_traces_for_group(pool: &PgPool, group_id: Uuid) -> Result<Vec<Trace>> {
    let traces = sqlx::query_as::<_, Trace>(
        "SELECT * FROM traces WHERE group_id = $1 ORDER BY id ASC",
    )
    .bind(group_id)
    .fetch_all(pool)
    .await
    .context("failed to list traces for group")?;

    Ok(traces)
}

/// Optimistically update a trace's derived state.
///
/// The WHERE clause pins `updated_at` to the caller's snapshot, so a
/// concurrent aggregation loses cleanly (0 rows affected) and the caller
/// retries against fresh data. `ended_at` is set only when the caller
/// passes it (terminal transition).
pub async fn update_trace_state(
    pool: &PgPool,
    id: Uuid,
    state: TraceState,
    last_event: Option<&str>,
    snapshot_updated_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE traces \
         SET state = $1, \
             last_event = COALESCE($2, last_event), \
             ended_at = COALESCE($3, ended_at), \
             updated_at = NOW() \
         WHERE id = $4 AND updated_at = $5",
    )
    .bind(state)
    .bind(last_event)
    .bind(ended_at)
    .bind(id)
    .bind(snapshot_updated_at)
    .execute(pool)
    .await
    .context("failed to update trace state")?;

    Ok(result.rows_affected())
}
