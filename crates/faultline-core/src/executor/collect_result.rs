//! CollectResult executor: read back what an algorithm run produced and
//! decide how the pipeline continues.
//!
//! For the detector algorithm the decision is pipeline-shaping: found
//! anomalies fan out one RunAlgorithm task per configured RCA
//! algorithm, while an empty or quiet datapack ends the pipeline (the
//! trace aggregator owns that early termination; this executor only
//! records the event).

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;

use faultline_db::models::{Task, TaskKind, TaskState};
use faultline_db::queries::executions;

use crate::error::ExecError;
use crate::events::names;

use super::payloads::{CollectResultPayload, RunAlgorithmPayload, parse_payload};
use super::{ExecContext, ExecOutcome, Executor, child_task, update_task_state};

pub struct CollectResultExecutor;

#[async_trait]
impl Executor for CollectResultExecutor {
    fn kind(&self) -> TaskKind {
        TaskKind::CollectResult
    }

    fn validate_payload(&self, payload: &serde_json::Value) -> Result<(), ExecError> {
        serde_json::from_value::<CollectResultPayload>(payload.clone())
            .map(|_| ())
            .map_err(|e| ExecError::Parse(e.to_string()))
    }

    async fn execute(&self, ctx: &ExecContext, task: &Task) -> Result<ExecOutcome> {
        let payload: CollectResultPayload = parse_payload(task)?;
        let is_detector = payload.algorithm.name == ctx.config.algo.detector;

        let (event, fan_out) = if is_detector {
            let rows = executions::detector_results(&ctx.pool, payload.execution_id).await?;
            if rows.is_empty() {
                (names::DATAPACK_NO_DETECTOR_DATA, false)
            } else if rows.iter().all(|r| r.issue_count == 0) {
                (names::DATAPACK_NO_ANOMALY, false)
            } else {
                (names::DATAPACK_RESULT_COLLECTION, true)
            }
        } else {
            let rows = executions::granularity_results(&ctx.pool, payload.execution_id).await?;
            if rows.is_empty() {
                (names::ALGO_NO_RESULT_DATA, false)
            } else {
                (names::ALGO_RESULT_COLLECTION, false)
            }
        };

        // Terminal state first: children must observe a completed
        // parent.
        update_task_state(ctx, task, TaskState::Completed, event).await?;
        ctx.publisher
            .publish(
                task,
                event,
                serde_json::json!({
                    "algorithm": payload.algorithm.name,
                    "datapack": payload.datapack.name,
                    "execution_id": payload.execution_id,
                }),
            )
            .await;

        if fan_out && !payload.rca_algorithms.is_empty() {
            for (idx, algorithm) in payload.rca_algorithms.iter().enumerate() {
                let run_payload = RunAlgorithmPayload {
                    algorithm: algorithm.clone(),
                    datapack: payload.datapack.clone(),
                    dataset_version_id: payload.dataset_version_id.clone(),
                    labels: payload.labels.clone(),
                    rca_algorithms: Vec::new(),
                };
                let child = child_task(
                    task,
                    TaskKind::RunAlgorithm,
                    serde_json::to_value(&run_payload)
                        .context("failed to serialise RCA run payload")?,
                    Utc::now(),
                    idx as i32,
                );
                ctx.queue
                    .submit(&child)
                    .await
                    .with_context(|| {
                        format!("failed to enqueue RCA run for {}", algorithm.name)
                    })?;
                tracing::info!(
                    task_id = %task.id,
                    child_task_id = %child.id,
                    algorithm = %algorithm.name,
                    "RCA algorithm run enqueued"
                );
            }
        }

        Ok(ExecOutcome::Completed { event })
    }
}
