//! RunAlgorithm executor: record an execution row and submit the
//! algorithm container against a datapack.
//!
//! The `algo_execution` token stays held while the job runs; the
//! cluster controller releases it when the job terminates.

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use faultline_db::models::{RateService, Task, TaskKind};
use faultline_db::queries::executions;

use crate::backoff::reschedule_delay;
use crate::cluster::api::{JobRequest, carrier_annotations, identity_labels, label_keys};
use crate::error::ExecError;
use crate::events::names;

use super::payloads::{RunAlgorithmPayload, parse_payload};
use super::{ExecContext, ExecOutcome, Executor, reschedule_contended};

pub struct RunAlgorithmExecutor;

#[async_trait]
impl Executor for RunAlgorithmExecutor {
    fn kind(&self) -> TaskKind {
        TaskKind::RunAlgorithm
    }

    fn validate_payload(&self, payload: &serde_json::Value) -> Result<(), ExecError> {
        serde_json::from_value::<RunAlgorithmPayload>(payload.clone())
            .map(|_| ())
            .map_err(|e| ExecError::Parse(e.to_string()))
    }

    async fn execute(&self, ctx: &ExecContext, task: &Task) -> Result<ExecOutcome> {
        let payload: RunAlgorithmPayload = parse_payload(task)?;

        let got_token = ctx
            .limiter
            .wait_for_token(RateService::AlgoExecution, task.id, task.trace_id, &ctx.cancel)
            .await?;
        if !got_token {
            return reschedule_contended(
                ctx,
                task,
                reschedule_delay(task.restart_num),
                "algorithm token unavailable",
            )
            .await;
        }

        let result = self.submit(ctx, task, &payload).await;
        if result.is_err() {
            // Submission never reached the cluster, so the controller
            // will never see a job end; give the token back here.
            ctx.limiter
                .release_token(RateService::AlgoExecution, task.id)
                .await?;
        }
        result
    }
}

impl RunAlgorithmExecutor {
    async fn submit(
        &self,
        ctx: &ExecContext,
        task: &Task,
        payload: &RunAlgorithmPayload,
    ) -> Result<ExecOutcome> {
        let execution_id = Uuid::now_v7();
        executions::insert(
            &ctx.pool,
            execution_id,
            &payload.algorithm.version_id,
            &payload.datapack.name,
            &payload.dataset_version_id,
        )
        .await
        .map_err(ExecError::Transient)?;

        let job = compose_job(ctx, task, payload, execution_id);
        ctx.cluster
            .submit_job(&job)
            .await
            .map_err(ExecError::Transient)?;

        ctx.publisher
            .publish(
                task,
                names::ALGO_RUN_SUBMITTED,
                serde_json::json!({
                    "algorithm": payload.algorithm.name,
                    "datapack": payload.datapack.name,
                    "execution_id": execution_id,
                    "job": job.name,
                }),
            )
            .await;

        tracing::info!(
            task_id = %task.id,
            algorithm = %payload.algorithm.name,
            execution_id = %execution_id,
            "algorithm job submitted"
        );

        Ok(ExecOutcome::InFlight {
            event: names::ALGO_RUN_SUBMITTED,
        })
    }
}

/// Compose the algorithm job: input from the datapack, output into a
/// timestamped directory an init container creates up front.
fn compose_job(
    ctx: &ExecContext,
    task: &Task,
    payload: &RunAlgorithmPayload,
    execution_id: Uuid,
) -> JobRequest {
    let mount = ctx.config.k8s.job_volume_mount.trim_end_matches('/');
    let stamp = Utc::now().format("%Y%m%d%H%M%S");
    let output_path = format!(
        "{mount}/{}/results/{}/{stamp}",
        payload.datapack.name, payload.algorithm.name
    );

    let env = vec![
        ("EXECUTION_ID".to_owned(), execution_id.to_string()),
        ("DATAPACK".to_owned(), payload.datapack.name.clone()),
        (
            "DATASET_VERSION_ID".to_owned(),
            payload.dataset_version_id.clone(),
        ),
        (
            "INPUT_PATH".to_owned(),
            format!("{mount}/{}", payload.datapack.name),
        ),
        ("OUTPUT_PATH".to_owned(), output_path.clone()),
        ("TIMEZONE".to_owned(), ctx.config.system.timezone.clone()),
    ];

    let mut labels = identity_labels(task, &ctx.config.k8s.app_id);
    labels.insert(label_keys::DATAPACK.to_owned(), payload.datapack.name.clone());
    labels.insert(label_keys::EXECUTION_ID.to_owned(), execution_id.to_string());

    let command = payload
        .algorithm
        .command
        .as_ref()
        .map(|c| vec!["sh".to_owned(), "-c".to_owned(), c.clone()])
        .unwrap_or_default();

    JobRequest {
        name: format!("algo-{}-{}", sanitize(&payload.algorithm.name), execution_id.simple()),
        namespace: ctx.config.k8s.namespace.clone(),
        image: payload.algorithm.image_ref.clone(),
        command,
        env,
        labels,
        annotations: carrier_annotations(task),
        volume_mount_path: ctx.config.k8s.job_volume_mount.clone(),
        create_output_dir: Some(output_path),
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_lowers_and_dashes() {
        assert_eq!(sanitize("E-Diagnose_v2"), "e-diagnose-v2");
    }
}
