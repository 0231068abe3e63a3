//! Queue store facade.
//!
//! Thin async wrapper over the queue tier queries, adding the blocking
//! ready-pop and the producer-side routing between the ready and delayed
//! tiers. All tier mutations are transactional in the query layer; this
//! type carries no in-process state, so it is cheap to clone and share.

use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use faultline_db::models::{QueueTier, Task};
use faultline_db::queries::{queue, tasks};

/// Poll cadence for the blocking ready-pop.
const READY_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Handle to the persistent queue.
#[derive(Clone)]
pub struct QueueStore {
    pool: PgPool,
}

impl QueueStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Persist a task row and place the task in the tier its schedule
    /// calls for: immediate (or already-due) tasks go straight to the
    /// ready list, future tasks to the delayed set.
    pub async fn submit(&self, task: &Task) -> Result<()> {
        tasks::upsert_task(&self.pool, task).await?;

        if task.immediate || task.execute_at <= Utc::now() {
            queue::submit_ready(&self.pool, task).await
        } else {
            queue::submit_delayed(&self.pool, task, task.execute_at).await
        }
    }

    /// Append a task to the ready list directly.
    pub async fn submit_ready(&self, task: &Task) -> Result<()> {
        tasks::upsert_task(&self.pool, task).await?;
        queue::submit_ready(&self.pool, task).await
    }

    /// Insert a task into the delayed set, scored by its `execute_at`.
    pub async fn submit_delayed(&self, task: &Task) -> Result<()> {
        tasks::upsert_task(&self.pool, task).await?;
        queue::submit_delayed(&self.pool, task, task.execute_at).await
    }

    /// Move all due delayed tasks to the ready list and return them.
    pub async fn promote_due(&self) -> Result<Vec<Task>> {
        queue::promote_due(&self.pool, Utc::now()).await
    }

    /// Blocking pop from the ready list, bounded by `timeout`.
    ///
    /// Polls the store; returns `None` when the timeout elapses with the
    /// list empty.
    pub async fn get_ready(&self, timeout: Duration) -> Result<Option<Task>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(task) = queue::pop_ready(&self.pool).await? {
                return Ok(Some(task));
            }
            if tokio::time::Instant::now() + READY_POLL_INTERVAL > deadline {
                return Ok(None);
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }

    /// Move a task to the dead-letter tier, scored by now.
    pub async fn move_to_dead(&self, task: &Task) -> Result<()> {
        queue::move_to_dead(&self.pool, task, Utc::now()).await
    }

    /// Remove a task from whichever tier holds it.
    pub async fn remove(&self, task_id: Uuid) -> Result<QueueTier> {
        queue::remove(&self.pool, task_id).await
    }

    /// Which tier currently holds a task, if any.
    pub async fn tier_of(&self, task_id: Uuid) -> Result<Option<QueueTier>> {
        queue::index_tier(&self.pool, task_id).await
    }

    /// Take one process-wide concurrency slot.
    pub async fn acquire_slot(&self) -> Result<bool> {
        queue::acquire_slot(&self.pool).await
    }

    /// Return one concurrency slot.
    pub async fn release_slot(&self) -> Result<()> {
        queue::release_slot(&self.pool).await
    }

    /// Configure the shared concurrency cap.
    pub async fn set_max_concurrency(&self, cap: i32) -> Result<()> {
        queue::set_max_slots(&self.pool, cap).await
    }
}
