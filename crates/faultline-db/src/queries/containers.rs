//! Query functions for the `container_versions` registry.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::ContainerVersion;

/// Insert or replace a named container version.
pub async fn upsert(
    pool: &PgPool,
    name: &str,
    version: &str,
    image_ref: &str,
    command: &str,
    env_schema: serde_json::Value,
) -> Result<ContainerVersion> {
    let row = sqlx::query_as::<_, ContainerVersion>(
        "INSERT INTO container_versions (id, name, version, image_ref, command, env_schema) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         ON CONFLICT (name, version) DO UPDATE \
         SET image_ref = EXCLUDED.image_ref, \
             command = EXCLUDED.command, \
             env_schema = EXCLUDED.env_schema \
         RETURNING *",
    )
    .bind(Uuid::now_v7())
    .bind(name)
    .bind(version)
    .bind(image_ref)
    .bind(command)
    .bind(env_schema)
    .fetch_one(pool)
    .await
    .context("failed to upsert container version")?;

    Ok(row)
}

/// Fetch a container version by name and version tag.
pub async fn get(pool: &PgPool, name: &str, version: &str) -> Result<Option<ContainerVersion>> {
    let row = sqlx::query_as::<_, ContainerVersion>(
        "SELECT * FROM container_versions WHERE name = $1 AND version = $2",
    )
    .bind(name)
    .bind(version)
    .fetch_optional(pool)
    .await
    .context("failed to fetch container version")?;
    Ok(row)
}

/// List all versions of a named container, newest first.
pub async fn list_for_name(pool: &PgPool, name: &str) -> Result<Vec<ContainerVersion>> {
    let rows = sqlx::query_as::<_, ContainerVersion>(
        "SELECT * FROM container_versions WHERE name = $1 ORDER BY created_at DESC",
    )
    .bind(name)
    .fetch_all(pool)
    .await
    .context("failed to list container versions")?;
    Ok(rows)
}
