//! Query functions for labels and their join tables.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::Label;

/// Get or create a label for a (key, value) pair.
pub async fn get_or_create(pool: &PgPool, key: &str, value: &str) -> Result<Label> {
    // ON CONFLICT DO UPDATE (a no-op update) so RETURNING always yields
    // the row, created or existing.
    let label = sqlx::query_as::<_, Label>(
        "INSERT INTO labels (id, key, value) VALUES ($1, $2, $3) \
         ON CONFLICT (key, value) DO UPDATE SET key = EXCLUDED.key \
         RETURNING *",
    )
    .bind(Uuid::now_v7())
    .bind(key)
    .bind(value)
    .fetch_one(pool)
    .await
    .context("failed to get or create label")?;

    Ok(label)
}

/// Attach a label to an injection. Idempotent.
pub async fn attach_to_injection(pool: &PgPool, injection_id: Uuid, label_id: Uuid) -> Result<()> {
    sqlx::query(
        "INSERT INTO injection_labels (injection_id, label_id) VALUES ($1, $2) \
         ON CONFLICT DO NOTHING",
    )
    .bind(injection_id)
    .bind(label_id)
    .execute(pool)
    .await
    .context("failed to attach label to injection")?;
    Ok(())
}

/// Attach a label to a datapack (by name). Idempotent.
pub async fn attach_to_datapack(pool: &PgPool, datapack: &str, label_id: Uuid) -> Result<()> {
    sqlx::query(
        "INSERT INTO datapack_labels (datapack, label_id) VALUES ($1, $2) \
         ON CONFLICT DO NOTHING",
    )
    .bind(datapack)
    .bind(label_id)
    .execute(pool)
    .await
    .context("failed to attach label to datapack")?;
    Ok(())
}

/// List the labels attached to an injection.
pub async fn list_for_injection(pool: &PgPool, injection_id: Uuid) -> Result<Vec<Label>> {
    let labels = sqlx::query_as::<_, Label>(
        "SELECT l.* FROM labels l \
         JOIN injection_labels il ON il.label_id = l.id \
         WHERE il.injection_id = $1 \
         ORDER BY l.key, l.value",
    )
    .bind(injection_id)
    .fetch_all(pool)
    .await
    .context("failed to list labels for injection")?;
    Ok(labels)
}

/// List the labels attached to a datapack.
pub async fn list_for_datapack(pool: &PgPool, datapack: &str) -> Result<Vec<Label>> {
    let labels = sqlx::query_as::<_, Label>(
        "SELECT l.* FROM labels l \
         JOIN datapack_labels dl ON dl.label_id = l.id \
         WHERE dl.datapack = $1 \
         ORDER BY l.key, l.value",
    )
    .bind(datapack)
    .fetch_all(pool)
    .await
    .context("failed to list labels for datapack")?;
    Ok(labels)
}
