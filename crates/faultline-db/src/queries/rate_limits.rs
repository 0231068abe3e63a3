//! Query functions for the `rate_tokens` buckets.
//!
//! The capacity check and insert run under a per-bucket advisory lock,
//! the store-side equivalent of a scripted check-and-add: two concurrent
//! acquirers on the same bucket serialise, so the bucket can never exceed
//! its capacity.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::RateService;

/// Tokens older than this are presumed leaked (holder died without
/// releasing) and reclaimed on the next acquire.
pub const STALE_TOKEN_SECS: i64 = 600;

/// Try to add `task_id` to the bucket for `service`. Returns true when
/// the bucket had room.
pub async fn try_acquire(
    pool: &PgPool,
    service: RateService,
    task_id: Uuid,
    trace_id: Uuid,
    capacity: i64,
) -> Result<bool> {
    let mut tx = pool.begin().await?;

    // Serialise acquirers on this bucket for the rest of the transaction.
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(service.to_string())
        .execute(&mut *tx)
        .await
        .context("failed to take bucket advisory lock")?;

    // Reclaim leaked tokens.
    sqlx::query(
        "DELETE FROM rate_tokens \
         WHERE service = $1 AND acquired_at < NOW() - make_interval(secs => $2)",
    )
    .bind(service)
    .bind(STALE_TOKEN_SECS as f64)
    .execute(&mut *tx)
    .await
    .context("failed to reclaim stale tokens")?;

    let count: (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM rate_tokens WHERE service = $1")
            .bind(service)
            .fetch_one(&mut *tx)
            .await
            .context("failed to count bucket occupancy")?;

    if count.0 >= capacity {
        tx.commit().await?;
        return Ok(false);
    }

    sqlx::query(
        "INSERT INTO rate_tokens (service, task_id, trace_id) \
         VALUES ($1, $2, $3) \
         ON CONFLICT (service, task_id) DO NOTHING",
    )
    .bind(service)
    .bind(task_id)
    .bind(trace_id)
    .execute(&mut *tx)
    .await
    .context("failed to insert rate token")?;

    tx.commit().await?;
    Ok(true)
}

/// Remove `task_id` from the bucket. Idempotent.
pub async fn release(pool: &PgPool, service: RateService, task_id: Uuid) -> Result<()> {
    sqlx::query("DELETE FROM rate_tokens WHERE service = $1 AND task_id = $2")
        .bind(service)
        .bind(task_id)
        .execute(pool)
        .await
        .context("failed to release rate token")?;
    Ok(())
}

/// Current bucket occupancy.
pub async fn count(pool: &PgPool, service: RateService) -> Result<i64> {
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM rate_tokens WHERE service = $1")
        .bind(service)
        .fetch_one(pool)
        .await
        .context("failed to count rate tokens")?;
    Ok(row.0)
}
