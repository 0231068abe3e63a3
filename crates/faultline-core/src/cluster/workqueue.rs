//! Delayed work queue for controller follow-ups.
//!
//! Handlers enqueue items with a delay (recovery checks, resource
//! deletions); a single worker drains them in expiry order. Failed items
//! re-queue with a growing delay up to a retry cap.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::time::DelayQueue;
use uuid::Uuid;

/// Give up re-driving a failed item after this many worker-level
/// retries. (Business-level retries, like recovery checks, are encoded
/// in the items themselves.)
const MAX_WORKER_RETRIES: u32 = 5;

/// Base delay for worker-level retries.
const RETRY_BASE: Duration = Duration::from_secs(1);
const RETRY_CAP: Duration = Duration::from_secs(60);

/// A deferred unit of controller work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkItem {
    /// Re-inspect a chaos resource for recovery.
    CheckRecovery {
        namespace: String,
        resource: String,
        injection: String,
        task_id: Uuid,
        injected_at: DateTime<Utc>,
        duration_minutes: i64,
        attempt: u32,
    },
    /// Best-effort chaos resource deletion.
    DeleteChaosResource { namespace: String, name: String },
    /// Best-effort job deletion.
    DeleteJob { namespace: String, name: String },
}

/// Processes one work item; may schedule a follow-up.
#[async_trait]
pub trait WorkHandler: Send + Sync + 'static {
    async fn handle(&self, item: WorkItem) -> Result<Option<(WorkItem, Duration)>>;
}

/// Producer handle into the work queue.
#[derive(Clone)]
pub struct WorkQueue {
    tx: mpsc::UnboundedSender<(WorkItem, Duration)>,
}

impl WorkQueue {
    /// Schedule an item to run after `delay`.
    pub fn schedule(&self, item: WorkItem, delay: Duration) {
        if self.tx.send((item, delay)).is_err() {
            tracing::warn!("work queue closed, dropping item");
        }
    }
}

/// Spawn the single worker draining the queue.
pub fn spawn_worker(handler: Arc<dyn WorkHandler>, cancel: CancellationToken) -> WorkQueue {
    let (tx, mut rx) = mpsc::unbounded_channel::<(WorkItem, Duration)>();

    tokio::spawn(async move {
        let mut queue: DelayQueue<(WorkItem, u32)> = DelayQueue::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("work queue worker stopped");
                    return;
                }
                received = rx.recv() => {
                    match received {
                        Some((item, delay)) => {
                            queue.insert((item, 0), delay);
                        }
                        None => return,
                    }
                }
                Some(expired) = queue.next(), if !queue.is_empty() => {
                    let (item, failures) = expired.into_inner();
                    match handler.handle(item.clone()).await {
                        Ok(Some((follow_up, delay))) => {
                            queue.insert((follow_up, 0), delay);
                        }
                        Ok(None) => {}
                        Err(e) => {
                            if failures + 1 >= MAX_WORKER_RETRIES {
                                tracing::error!(
                                    item = ?item,
                                    error = %e,
                                    "work item dropped after {MAX_WORKER_RETRIES} failures"
                                );
                            } else {
                                let delay = (RETRY_BASE * 2u32.pow(failures)).min(RETRY_CAP);
                                tracing::warn!(
                                    item = ?item,
                                    error = %e,
                                    retry_in = ?delay,
                                    "work item failed, re-queueing"
                                );
                                queue.insert((item, failures + 1), delay);
                            }
                        }
                    }
                }
            }
        }
    });

    WorkQueue { tx }
}
