//! Query functions for the `executions` table and the result rows that
//! algorithm containers write back.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{DetectorResult, Execution, ExecutionState, GranularityResult};

/// Insert a new execution row in `initial` state.
pub async fn insert(
    pool: &PgPool,
    id: Uuid,
    algorithm_version_id: &str,
    datapack_id: &str,
    dataset_version_id: &str,
) -> Result<Execution> {
    let row = sqlx::query_as::<_, Execution>(
        "INSERT INTO executions (id, algorithm_version_id, datapack_id, dataset_version_id) \
         VALUES ($1, $2, $3, $4) \
         RETURNING *",
    )
    .bind(id)
    .bind(algorithm_version_id)
    .bind(datapack_id)
    .bind(dataset_version_id)
    .fetch_one(pool)
    .await
    .context("failed to insert execution")?;

    Ok(row)
}

/// Fetch an execution by ID.
pub async fn get(pool: &PgPool, id: Uuid) -> Result<Option<Execution>> {
    let row = sqlx::query_as::<_, Execution>("SELECT * FROM executions WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch execution")?;
    Ok(row)
}

/// Set an execution's state and status text.
pub async fn set_state(
    pool: &PgPool,
    id: Uuid,
    state: ExecutionState,
    status: &str,
) -> Result<u64> {
    let result = sqlx::query("UPDATE executions SET state = $1, status = $2 WHERE id = $3")
        .bind(state)
        .bind(status)
        .bind(id)
        .execute(pool)
        .await
        .context("failed to set execution state")?;

    Ok(result.rows_affected())
}

/// All detector rows for an execution.
pub async fn detector_results(pool: &PgPool, execution_id: Uuid) -> Result<Vec<DetectorResult>> {
    let rows = sqlx::query_as::<_, DetectorResult>(
        "SELECT * FROM detector_results WHERE execution_id = $1 ORDER BY id",
    )
    .bind(execution_id)
    .fetch_all(pool)
    .await
    .context("failed to fetch detector results")?;
    Ok(rows)
}

/// All granularity rows for an execution.
pub async fn granularity_results(
    pool: &PgPool,
    execution_id: Uuid,
) -> Result<Vec<GranularityResult>> {
    let rows = sqlx::query_as::<_, GranularityResult>(
        "SELECT * FROM granularity_results WHERE execution_id = $1 ORDER BY rank",
    )
    .bind(execution_id)
    .fetch_all(pool)
    .await
    .context("failed to fetch granularity results")?;
    Ok(rows)
}

/// Insert one detector result row (used by the result ingestion path and
/// by tests).
pub async fn insert_detector_result(
    pool: &PgPool,
    execution_id: Uuid,
    span_name: &str,
    issue_count: i32,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO detector_results (execution_id, span_name, issue_count) \
         VALUES ($1, $2, $3)",
    )
    .bind(execution_id)
    .bind(span_name)
    .bind(issue_count)
    .execute(pool)
    .await
    .context("failed to insert detector result")?;
    Ok(())
}

/// Insert one granularity result row.
pub async fn insert_granularity_result(
    pool: &PgPool,
    execution_id: Uuid,
    granularity: &str,
    result: &str,
    rank: i32,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO granularity_results (execution_id, granularity, result, rank) \
         VALUES ($1, $2, $3, $4)",
    )
    .bind(execution_id)
    .bind(granularity)
    .bind(result)
    .bind(rank)
    .execute(pool)
    .await
    .context("failed to insert granularity result")?;
    Ok(())
}
