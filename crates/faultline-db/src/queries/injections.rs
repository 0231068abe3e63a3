//! Query functions for the `injections` table.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Injection, InjectionState};

/// Fields for a new injection batch row.
#[derive(Debug, Clone)]
pub struct NewInjection<'a> {
    pub id: Uuid,
    pub name: &'a str,
    pub fault_type: &'a str,
    pub category: &'a str,
    pub engine_config: serde_json::Value,
    pub display_config: serde_json::Value,
    pub groundtruths: serde_json::Value,
    pub pre_duration: i32,
    pub task_id: Uuid,
    pub benchmark_id: &'a str,
    pub pedestal_id: &'a str,
}

/// Insert a new injection row in `initial` state.
pub async fn insert(pool: &PgPool, inj: &NewInjection<'_>) -> Result<Injection> {
    let row = sqlx::query_as::<_, Injection>(
        "INSERT INTO injections \
             (id, name, fault_type, category, engine_config, display_config, \
              groundtruths, pre_duration, task_id, benchmark_id, pedestal_id) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
         RETURNING *",
    )
    .bind(inj.id)
    .bind(inj.name)
    .bind(inj.fault_type)
    .bind(inj.category)
    .bind(&inj.engine_config)
    .bind(&inj.display_config)
    .bind(&inj.groundtruths)
    .bind(inj.pre_duration)
    .bind(inj.task_id)
    .bind(inj.benchmark_id)
    .bind(inj.pedestal_id)
    .fetch_one(pool)
    .await
    .context("failed to insert injection")?;

    Ok(row)
}

/// Fetch an injection by its batch name.
pub async fn get_by_name(pool: &PgPool, name: &str) -> Result<Option<Injection>> {
    let row = sqlx::query_as::<_, Injection>("SELECT * FROM injections WHERE name = $1")
        .bind(name)
        .fetch_optional(pool)
        .await
        .context("failed to fetch injection by name")?;
    Ok(row)
}

/// Fetch the injection created by a given task.
pub async fn get_by_task(pool: &PgPool, task_id: Uuid) -> Result<Option<Injection>> {
    let row = sqlx::query_as::<_, Injection>(
        "SELECT * FROM injections WHERE task_id = $1 ORDER BY created_at DESC LIMIT 1",
    )
    .bind(task_id)
    .fetch_optional(pool)
    .await
    .context("failed to fetch injection by task")?;
    Ok(row)
}

/// Record the cluster resource name observed for this batch.
pub async fn set_resource_name(pool: &PgPool, name: &str, resource: &str) -> Result<()> {
    sqlx::query("UPDATE injections SET resource_name = $1 WHERE name = $2")
        .bind(resource)
        .bind(name)
        .execute(pool)
        .await
        .context("failed to set injection resource name")?;
    Ok(())
}

/// Transition an injection's state, optimistically locked on the
/// expected current state.
///
/// Returns rows affected; 0 means the row was not in `from` (a business
/// rejection for the caller to surface).
pub async fn transition_state(
    pool: &PgPool,
    name: &str,
    from: InjectionState,
    to: InjectionState,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE injections \
         SET state = $1, \
             started_at = COALESCE($2, started_at), \
             ended_at = COALESCE($3, ended_at) \
         WHERE name = $4 AND state = $5",
    )
    .bind(to)
    .bind(started_at)
    .bind(ended_at)
    .bind(name)
    .bind(from)
    .execute(pool)
    .await
    .context("failed to transition injection state")?;

    Ok(result.rows_affected())
}
