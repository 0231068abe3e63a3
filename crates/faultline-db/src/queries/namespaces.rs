//! Query functions for the `namespaces` lock pool.
//!
//! The acquire/release paths are transactional check-and-sets: the row is
//! taken `FOR UPDATE`, inspected, and rewritten in the same transaction,
//! so at most one concurrent acquirer wins a free namespace.

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::{Namespace, NamespaceStatus};

/// Outcome of a lock acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// Lock taken (or re-taken by the same trace).
    Acquired,
    /// Another trace holds an unexpired lease.
    Held { holder: String, lease_until: i64 },
    /// The namespace is disabled or deleted.
    Unavailable { status: NamespaceStatus },
    /// No such namespace row.
    NotFound,
}

/// Transactionally try to lease a namespace until `lease_until` (unix
/// seconds) on behalf of `trace_id`.
///
/// Succeeds when the namespace is enabled and free, its lease has
/// expired, or the same trace already holds it (reentrant).
pub async fn try_acquire(
    pool: &PgPool,
    name: &str,
    lease_until: i64,
    trace_id: &str,
    now: i64,
) -> Result<AcquireOutcome> {
    let mut tx = pool.begin().await?;

    let row: Option<Namespace> =
        sqlx::query_as("SELECT * FROM namespaces WHERE name = $1 FOR UPDATE")
            .bind(name)
            .fetch_optional(&mut *tx)
            .await
            .context("failed to lock namespace row")?;

    let Some(ns) = row else {
        tx.commit().await?;
        return Ok(AcquireOutcome::NotFound);
    };

    let status = ns.status_enum().context("corrupt namespace status")?;
    if status != NamespaceStatus::Enabled {
        tx.commit().await?;
        return Ok(AcquireOutcome::Unavailable { status });
    }

    let free = ns.trace_id.is_empty() || ns.lease_until <= now;
    let reentrant = ns.trace_id == trace_id;
    if !free && !reentrant {
        tx.commit().await?;
        return Ok(AcquireOutcome::Held {
            holder: ns.trace_id,
            lease_until: ns.lease_until,
        });
    }

    sqlx::query(
        "UPDATE namespaces SET trace_id = $1, lease_until = $2 WHERE name = $3",
    )
    .bind(trace_id)
    .bind(lease_until)
    .bind(name)
    .execute(&mut *tx)
    .await
    .context("failed to write namespace lease")?;

    tx.commit().await?;
    Ok(AcquireOutcome::Acquired)
}

/// Outcome of a lock release attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Released,
    /// A different trace holds the lock.
    HeldByOther { holder: String },
    NotFound,
}

/// Transactionally release a namespace lease held by `trace_id`.
///
/// Releasing a free namespace is a no-op success; releasing someone
/// else's lease is refused.
pub async fn try_release(
    pool: &PgPool,
    name: &str,
    trace_id: &str,
    now: i64,
) -> Result<ReleaseOutcome> {
    let mut tx = pool.begin().await?;

    let row: Option<Namespace> =
        sqlx::query_as("SELECT * FROM namespaces WHERE name = $1 FOR UPDATE")
            .bind(name)
            .fetch_optional(&mut *tx)
            .await
            .context("failed to lock namespace row")?;

    let Some(ns) = row else {
        tx.commit().await?;
        return Ok(ReleaseOutcome::NotFound);
    };

    if !ns.trace_id.is_empty() && ns.trace_id != trace_id {
        tx.commit().await?;
        return Ok(ReleaseOutcome::HeldByOther {
            holder: ns.trace_id,
        });
    }

    sqlx::query(
        "UPDATE namespaces SET trace_id = '', lease_until = $1 WHERE name = $2",
    )
    .bind(now)
    .bind(name)
    .execute(&mut *tx)
    .await
    .context("failed to clear namespace lease")?;

    tx.commit().await?;
    Ok(ReleaseOutcome::Released)
}

/// Insert a namespace row if absent (lazy-load path). Existing rows are
/// left untouched.
pub async fn insert_if_absent(pool: &PgPool, name: &str) -> Result<()> {
    sqlx::query(
        "INSERT INTO namespaces (name, status) VALUES ($1, $2) \
         ON CONFLICT (name) DO NOTHING",
    )
    .bind(name)
    .bind(NamespaceStatus::Enabled.code())
    .execute(pool)
    .await
    .context("failed to insert namespace")?;
    Ok(())
}

/// Set a namespace's status code.
pub async fn set_status(pool: &PgPool, name: &str, status: NamespaceStatus) -> Result<()> {
    sqlx::query("UPDATE namespaces SET status = $1 WHERE name = $2")
        .bind(status.code())
        .bind(name)
        .execute(pool)
        .await
        .context("failed to set namespace status")?;
    Ok(())
}

/// Fetch a single namespace row.
pub async fn get(pool: &PgPool, name: &str) -> Result<Option<Namespace>> {
    let ns = sqlx::query_as::<_, Namespace>("SELECT * FROM namespaces WHERE name = $1")
        .bind(name)
        .fetch_optional(pool)
        .await
        .context("failed to fetch namespace")?;
    Ok(ns)
}

/// Snapshot of every namespace row, ordered by name.
pub async fn list(pool: &PgPool) -> Result<Vec<Namespace>> {
    let rows = sqlx::query_as::<_, Namespace>("SELECT * FROM namespaces ORDER BY name")
        .fetch_all(pool)
        .await
        .context("failed to list namespaces")?;
    Ok(rows)
}
