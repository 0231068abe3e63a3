//! Named token-bucket rate limiters.
//!
//! Buckets live in the store as sets of task ids, so the capacity bound
//! holds across processes. Acquisition is an atomic check-and-add in the
//! query layer; this type adds per-service capacities and the polling
//! wait.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use faultline_db::models::RateService;
use faultline_db::queries::rate_limits as db;

use crate::config::RateLimitingSection;

/// Cadence of the token wait poll.
const TOKEN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Token buckets for the three rate-limited services.
pub struct RateLimiter {
    pool: PgPool,
    capacities: HashMap<RateService, i64>,
    wait_timeout: Duration,
}

impl RateLimiter {
    pub fn new(pool: PgPool, cfg: &RateLimitingSection) -> Self {
        let capacities = HashMap::from([
            (RateService::RestartPedestal, cfg.max_restart_pedestal),
            (RateService::BuildContainer, cfg.max_build_container),
            (RateService::AlgoExecution, cfg.max_algo_execution),
        ]);
        Self {
            pool,
            capacities,
            wait_timeout: Duration::from_secs(cfg.token_wait_timeout),
        }
    }

    pub fn capacity(&self, service: RateService) -> i64 {
        self.capacities.get(&service).copied().unwrap_or(1)
    }

    pub fn wait_timeout(&self) -> Duration {
        self.wait_timeout
    }

    /// One-shot acquisition attempt.
    pub async fn acquire_token(
        &self,
        service: RateService,
        task_id: Uuid,
        trace_id: Uuid,
    ) -> Result<bool> {
        let acquired =
            db::try_acquire(&self.pool, service, task_id, trace_id, self.capacity(service))
                .await?;
        if acquired {
            tracing::debug!(service = %service, task_id = %task_id, "rate token acquired");
        }
        Ok(acquired)
    }

    /// Poll for a token until the configured timeout or cancellation.
    ///
    /// Returns false on timeout; the caller reschedules the task.
    pub async fn wait_for_token(
        &self,
        service: RateService,
        task_id: Uuid,
        trace_id: Uuid,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let deadline = tokio::time::Instant::now() + self.wait_timeout;
        loop {
            if self.acquire_token(service, task_id, trace_id).await? {
                return Ok(true);
            }
            if tokio::time::Instant::now() + TOKEN_POLL_INTERVAL > deadline {
                tracing::debug!(service = %service, task_id = %task_id, "token wait timed out");
                return Ok(false);
            }
            tokio::select! {
                _ = tokio::time::sleep(TOKEN_POLL_INTERVAL) => {}
                _ = cancel.cancelled() => {
                    anyhow::bail!("cancelled while waiting for {service} token");
                }
            }
        }
    }

    /// Remove a held token. Idempotent; safe on every exit path.
    pub async fn release_token(&self, service: RateService, task_id: Uuid) -> Result<()> {
        db::release(&self.pool, service, task_id).await?;
        tracing::debug!(service = %service, task_id = %task_id, "rate token released");
        Ok(())
    }

    /// Current occupancy of a bucket.
    pub async fn occupancy(&self, service: RateService) -> Result<i64> {
        db::count(&self.pool, service).await
    }
}
