//! BuildDatapack executor: submit the benchmark job that packages
//! telemetry around the injected fault window.

use anyhow::Result;
use async_trait::async_trait;

use faultline_db::models::{Task, TaskKind};

use crate::cluster::api::{JobRequest, carrier_annotations, identity_labels, label_keys};
use crate::error::ExecError;
use crate::events::names;

use super::payloads::{BuildDatapackPayload, parse_payload};
use super::{ExecContext, ExecOutcome, Executor};

pub struct BuildDatapackExecutor;

#[async_trait]
impl Executor for BuildDatapackExecutor {
    fn kind(&self) -> TaskKind {
        TaskKind::BuildDatapack
    }

    fn validate_payload(&self, payload: &serde_json::Value) -> Result<(), ExecError> {
        serde_json::from_value::<BuildDatapackPayload>(payload.clone())
            .map(|_| ())
            .map_err(|e| ExecError::Parse(e.to_string()))
    }

    async fn execute(&self, ctx: &ExecContext, task: &Task) -> Result<ExecOutcome> {
        let payload: BuildDatapackPayload = parse_payload(task)?;

        let job = compose_job(ctx, task, &payload);
        ctx.cluster
            .submit_job(&job)
            .await
            .map_err(ExecError::Transient)?;

        ctx.publisher
            .publish(
                task,
                names::DATAPACK_BUILD_SUBMITTED,
                serde_json::json!({
                    "datapack": payload.datapack.name,
                    "job": job.name,
                }),
            )
            .await;

        tracing::info!(
            task_id = %task.id,
            datapack = %payload.datapack.name,
            job = %job.name,
            "datapack build job submitted"
        );

        Ok(ExecOutcome::InFlight {
            event: names::DATAPACK_BUILD_SUBMITTED,
        })
    }
}

/// Compose the benchmark job for one datapack.
///
/// The normal window precedes the fault window by `pre_duration`
/// minutes; input and output paths are rooted at the datapack name
/// inside the shared volume.
fn compose_job(ctx: &ExecContext, task: &Task, payload: &BuildDatapackPayload) -> JobRequest {
    let dp = &payload.datapack;
    let mount = ctx.config.k8s.job_volume_mount.trim_end_matches('/');

    let normal_start = dp.start_time - dp.pre_duration * 60;
    let env = vec![
        ("NORMAL_START".to_owned(), normal_start.to_string()),
        ("NORMAL_END".to_owned(), dp.start_time.to_string()),
        ("ABNORMAL_START".to_owned(), dp.start_time.to_string()),
        ("ABNORMAL_END".to_owned(), dp.end_time.to_string()),
        ("NAMESPACE".to_owned(), payload.namespace.clone()),
        ("TIMEZONE".to_owned(), ctx.config.system.timezone.clone()),
        ("WORKSPACE".to_owned(), mount.to_owned()),
        ("INPUT_PATH".to_owned(), format!("{mount}/{}", dp.name)),
        ("OUTPUT_PATH".to_owned(), format!("{mount}/{}", dp.name)),
    ];

    let mut labels = identity_labels(task, &ctx.config.k8s.app_id);
    labels.insert(label_keys::DATAPACK.to_owned(), dp.name.clone());

    let mut annotations = carrier_annotations(task);
    annotations.insert(
        "faultline.dev/datapack".to_owned(),
        serde_json::to_string(dp).unwrap_or_default(),
    );

    JobRequest {
        name: job_name(&dp.name, task.restart_num),
        namespace: ctx.config.k8s.namespace.clone(),
        image: payload.benchmark.image_ref.clone(),
        command: Vec::new(),
        env,
        labels,
        annotations,
        volume_mount_path: ctx.config.k8s.job_volume_mount.clone(),
        create_output_dir: None,
    }
}

/// Job names must be DNS-safe and unique across retries.
fn job_name(datapack: &str, restart_num: i32) -> String {
    let safe: String = datapack
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    format!("dp-{}-r{restart_num}", safe.trim_matches('-'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_name_sanitizes() {
        assert_eq!(job_name("TS_order.fault", 0), "dp-ts-order-fault-r0");
        assert_eq!(job_name("plain", 2), "dp-plain-r2");
    }
}
