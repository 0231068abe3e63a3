//! Delayed-task scheduler.
//!
//! A one-second tick promotes due delayed tasks to the ready list. Tasks
//! carrying a cron expression are re-inserted into the delayed set at
//! their next occurrence; a cron expression that fails to produce one is
//! logged and dropped so a mis-schedule cannot stall the queue.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use croner::Cron;
use tokio_util::sync::CancellationToken;

use crate::queue::QueueStore;

/// Promotion tick.
const TICK: Duration = Duration::from_secs(1);

/// Run the scheduler loop until cancelled.
pub async fn run(queue: QueueStore, cancel: CancellationToken) {
    let mut tick = tokio::time::interval(TICK);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("scheduler stopped");
                return;
            }
            _ = tick.tick() => {}
        }

        if let Err(e) = promote_once(&queue).await {
            tracing::warn!(error = %e, "promotion pass failed");
        }
    }
}

/// One promotion pass. Returns how many tasks were promoted.
pub async fn promote_once(queue: &QueueStore) -> Result<usize> {
    let promoted = queue.promote_due().await?;
    let count = promoted.len();

    for task in promoted {
        let Some(expr) = task.cron_expr.clone() else {
            continue;
        };

        match cron_next(&expr, Utc::now()) {
            Ok(next) => {
                let mut recurrence = task.clone();
                recurrence.execute_at = next;
                if let Err(e) = queue.submit_delayed(&recurrence).await {
                    tracing::error!(
                        task_id = %task.id,
                        cron = %expr,
                        error = %e,
                        "failed to re-queue cron task, dropping recurrence"
                    );
                }
            }
            Err(e) => {
                tracing::error!(
                    task_id = %task.id,
                    cron = %expr,
                    error = %e,
                    "cron expression yielded no next occurrence, dropping recurrence"
                );
            }
        }
    }

    if count > 0 {
        tracing::debug!(promoted = count, "promoted delayed tasks");
    }
    Ok(count)
}

/// Next occurrence of a cron expression strictly after `after`.
pub fn cron_next(expr: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let cron = Cron::new(expr)
        .with_seconds_optional()
        .parse()
        .with_context(|| format!("invalid cron expression {expr:?}"))?;
    let next = cron
        .find_next_occurrence(&after, false)
        .with_context(|| format!("no next occurrence for cron expression {expr:?}"))?;
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn cron_next_hourly() {
        let after = Utc.with_ymd_and_hms(2026, 3, 1, 10, 30, 0).unwrap();
        let next = cron_next("0 * * * *", after).expect("hourly cron");
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 1, 11, 0, 0).unwrap());
    }

    #[test]
    fn cron_next_with_seconds_field() {
        let after = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();
        let next = cron_next("30 0 * * * *", after).expect("six-field cron");
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 30).unwrap());
    }

    #[test]
    fn cron_next_rejects_garbage() {
        assert!(cron_next("not a cron", Utc::now()).is_err());
    }
}
