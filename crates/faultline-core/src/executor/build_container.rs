//! BuildContainer executor: produce and push a container image from a
//! source tree.

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

use faultline_db::models::{RateService, Task, TaskKind, TaskState};

use crate::backoff::reschedule_delay;
use crate::error::ExecError;
use crate::events::names;

use super::payloads::{BuildContainerPayload, parse_payload};
use super::{ExecContext, ExecOutcome, Executor, reschedule_contended, update_task_state};

pub struct BuildContainerExecutor;

#[async_trait]
impl Executor for BuildContainerExecutor {
    fn kind(&self) -> TaskKind {
        TaskKind::BuildContainer
    }

    fn validate_payload(&self, payload: &serde_json::Value) -> Result<(), ExecError> {
        serde_json::from_value::<BuildContainerPayload>(payload.clone())
            .map(|_| ())
            .map_err(|e| ExecError::Parse(e.to_string()))
    }

    async fn execute(&self, ctx: &ExecContext, task: &Task) -> Result<ExecOutcome> {
        let payload: BuildContainerPayload = parse_payload(task)?;

        let got_token = ctx
            .limiter
            .wait_for_token(RateService::BuildContainer, task.id, task.trace_id, &ctx.cancel)
            .await?;
        if !got_token {
            return reschedule_contended(
                ctx,
                task,
                reschedule_delay(task.restart_num),
                "build token unavailable",
            )
            .await;
        }

        let build_result = ctx
            .builder
            .build_and_push(
                &payload.image_ref,
                Path::new(&payload.source_path),
                &payload.build_options,
            )
            .await;

        // The token comes back on every exit path.
        ctx.limiter
            .release_token(RateService::BuildContainer, task.id)
            .await?;

        if let Err(e) = build_result {
            tracing::warn!(
                task_id = %task.id,
                image_ref = %payload.image_ref,
                error = %e,
                "image build failed"
            );
            return Err(ExecError::Transient(e).into());
        }

        update_task_state(ctx, task, TaskState::Completed, names::IMAGE_BUILD_SUCCESS).await?;
        ctx.publisher
            .publish(
                task,
                names::IMAGE_BUILD_SUCCESS,
                serde_json::json!({ "image_ref": payload.image_ref }),
            )
            .await;

        // The source tree is single-use; reclaim the space. Tolerable
        // failure: the image is already pushed.
        if let Err(e) = tokio::fs::remove_dir_all(&payload.source_path).await {
            tracing::warn!(
                task_id = %task.id,
                source_path = %payload.source_path,
                error = %e,
                "failed to delete build source tree"
            );
        }

        Ok(ExecOutcome::Completed {
            event: names::IMAGE_BUILD_SUCCESS,
        })
    }
}
