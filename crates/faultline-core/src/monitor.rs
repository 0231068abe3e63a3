//! Namespace lock monitor.
//!
//! Serialises pedestal restarts and fault injections against the finite
//! pool of environment namespaces. The lease rows live in the store (so
//! multiple processes contend correctly); this type adds the configured
//! set, lazy-loading, the regex scan used by restarts, and the
//! reconcile-with-configuration pass.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use chrono::Utc;
use regex::Regex;
use sqlx::PgPool;
use tokio::sync::RwLock;

use faultline_db::models::{Namespace, NamespaceStatus, TaskKind};
use faultline_db::queries::namespaces as db;

pub use faultline_db::queries::namespaces::{AcquireOutcome, ReleaseOutcome};

/// Monitor over the namespace lock pool.
pub struct NamespaceMonitor {
    pool: PgPool,
    /// Namespaces present in the current configuration. Guarded by a
    /// write lock so `refresh` reconciles against a stable set.
    configured: RwLock<BTreeSet<String>>,
}

/// What one reconcile pass changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshDiff {
    pub added: Vec<String>,
    pub recovered: Vec<String>,
    pub disabled: Vec<String>,
    pub deleted: Vec<String>,
}

impl RefreshDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty()
            && self.recovered.is_empty()
            && self.disabled.is_empty()
            && self.deleted.is_empty()
    }
}

impl NamespaceMonitor {
    pub fn new(pool: PgPool, configured: impl IntoIterator<Item = String>) -> Self {
        Self {
            pool,
            configured: RwLock::new(configured.into_iter().collect()),
        }
    }

    /// Try to lease `ns` until `lease_until` (unix seconds) for
    /// `trace_id`.
    ///
    /// Lazy-loads the row when the namespace is configured but has never
    /// been seen. Succeeds when the namespace is free, its lease has
    /// expired, or the same trace already holds it.
    pub async fn acquire_lock(
        &self,
        ns: &str,
        lease_until: i64,
        trace_id: &str,
        task_kind: TaskKind,
    ) -> Result<AcquireOutcome> {
        let now = Utc::now().timestamp();
        let mut outcome = db::try_acquire(&self.pool, ns, lease_until, trace_id, now).await?;

        if outcome == AcquireOutcome::NotFound {
            let configured = self.configured.read().await;
            if configured.contains(ns) {
                db::insert_if_absent(&self.pool, ns).await?;
                outcome = db::try_acquire(&self.pool, ns, lease_until, trace_id, now).await?;
            }
        }

        match &outcome {
            AcquireOutcome::Acquired => {
                tracing::info!(
                    namespace = ns,
                    trace_id = trace_id,
                    task_kind = %task_kind,
                    lease_until = lease_until,
                    "namespace lock acquired"
                );
            }
            AcquireOutcome::Held { holder, .. } => {
                tracing::debug!(
                    namespace = ns,
                    trace_id = trace_id,
                    holder = holder,
                    "namespace lock held by another trace"
                );
            }
            _ => {}
        }

        Ok(outcome)
    }

    /// Release a lease held by `trace_id`. Releasing a free namespace
    /// succeeds; releasing someone else's lease fails.
    pub async fn release_lock(&self, ns: &str, trace_id: &str) -> Result<()> {
        let now = Utc::now().timestamp();
        match db::try_release(&self.pool, ns, trace_id, now).await? {
            ReleaseOutcome::Released => {
                tracing::info!(namespace = ns, trace_id = trace_id, "namespace lock released");
                Ok(())
            }
            ReleaseOutcome::HeldByOther { holder } => {
                anyhow::bail!(
                    "namespace {ns} is held by trace {holder}, not releasable by {trace_id}"
                )
            }
            ReleaseOutcome::NotFound => anyhow::bail!("namespace {ns} not found"),
        }
    }

    /// Find and lock an enabled namespace matching `pattern`.
    ///
    /// Iterates enabled namespaces in name order and returns the first
    /// one this trace manages to lock, or `None` when the pool is
    /// exhausted.
    pub async fn namespace_to_restart(
        &self,
        lease_until: i64,
        pattern: &str,
        trace_id: &str,
    ) -> Result<Option<String>> {
        let re = Regex::new(pattern)
            .with_context(|| format!("invalid namespace pattern {pattern:?}"))?;

        // Lazy-load configured namespaces so a fresh deployment can
        // restart before the first refresh tick.
        {
            let configured = self.configured.read().await;
            for name in configured.iter() {
                db::insert_if_absent(&self.pool, name).await?;
            }
        }

        for ns in db::list(&self.pool).await? {
            if ns.status != NamespaceStatus::Enabled.code() || !re.is_match(&ns.name) {
                continue;
            }
            let outcome = self
                .acquire_lock(&ns.name, lease_until, trace_id, TaskKind::RestartPedestal)
                .await?;
            if outcome == AcquireOutcome::Acquired {
                return Ok(Some(ns.name));
            }
        }

        Ok(None)
    }

    /// Whether `trace_id` currently holds an unexpired lease on `ns`.
    pub async fn is_held_by(&self, ns: &str, trace_id: &str) -> Result<bool> {
        let now = Utc::now().timestamp();
        Ok(db::get(&self.pool, ns)
            .await?
            .is_some_and(|row| row.trace_id == trace_id && row.lease_until > now))
    }

    /// Reconcile the pool against the current configuration.
    ///
    /// New configured namespaces are added; previously disabled or
    /// deleted ones that reappear in config are recovered; namespaces
    /// dropped from config are disabled while leased and deleted once
    /// free. Idempotent: a second pass right after a first reports an
    /// empty diff.
    pub async fn refresh_namespaces(&self) -> Result<RefreshDiff> {
        // Write lock: the reconcile must see a stable configured set.
        let configured = self.configured.write().await;
        let now = Utc::now().timestamp();
        let mut diff = RefreshDiff::default();

        let known = db::list(&self.pool).await?;

        for name in configured.iter() {
            match known.iter().find(|ns| &ns.name == name) {
                None => {
                    db::insert_if_absent(&self.pool, name).await?;
                    diff.added.push(name.clone());
                }
                Some(ns) if ns.status != NamespaceStatus::Enabled.code() => {
                    db::set_status(&self.pool, name, NamespaceStatus::Enabled).await?;
                    diff.recovered.push(name.clone());
                }
                Some(_) => {}
            }
        }

        for ns in &known {
            if configured.contains(&ns.name) {
                continue;
            }
            let leased = !ns.trace_id.is_empty() && ns.lease_until > now;
            let target = if leased {
                NamespaceStatus::Disabled
            } else {
                NamespaceStatus::Deleted
            };
            if ns.status != target.code() {
                db::set_status(&self.pool, &ns.name, target).await?;
                match target {
                    NamespaceStatus::Disabled => diff.disabled.push(ns.name.clone()),
                    _ => diff.deleted.push(ns.name.clone()),
                }
            }
        }

        if !diff.is_empty() {
            tracing::info!(
                added = diff.added.len(),
                recovered = diff.recovered.len(),
                disabled = diff.disabled.len(),
                deleted = diff.deleted.len(),
                "namespace pool reconciled"
            );
        }

        Ok(diff)
    }

    /// Replace the configured namespace set (e.g. after a config
    /// reload). The next `refresh_namespaces` applies it.
    pub async fn set_configured(&self, names: impl IntoIterator<Item = String>) {
        let mut configured = self.configured.write().await;
        *configured = names.into_iter().collect();
    }

    /// Snapshot of all namespace rows.
    pub async fn inspect_lock(&self) -> Result<Vec<Namespace>> {
        db::list(&self.pool).await
    }
}
