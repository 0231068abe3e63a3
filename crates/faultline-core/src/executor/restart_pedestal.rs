//! RestartPedestal executor: lease an environment namespace and install
//! the pedestal into it, then line up the fault injection.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};

use faultline_db::models::{RateService, Task, TaskKind, TaskState};

use crate::backoff::reschedule_delay;
use crate::error::ExecError;
use crate::events::names;

use super::payloads::{RestartPedestalPayload, parse_payload};
use super::primitives::namespace_index;
use super::{
    ExecContext, ExecOutcome, Executor, child_task, reschedule_contended, update_task_state,
};

pub struct RestartPedestalExecutor;

#[async_trait]
impl Executor for RestartPedestalExecutor {
    fn kind(&self) -> TaskKind {
        TaskKind::RestartPedestal
    }

    fn validate_payload(&self, payload: &serde_json::Value) -> Result<(), ExecError> {
        serde_json::from_value::<RestartPedestalPayload>(payload.clone())
            .map(|_| ())
            .map_err(|e| ExecError::Parse(e.to_string()))
    }

    async fn execute(&self, ctx: &ExecContext, task: &Task) -> Result<ExecOutcome> {
        let payload: RestartPedestalPayload = parse_payload(task)?;
        let trace_id = task.trace_id.to_string();

        let got_token = ctx
            .limiter
            .wait_for_token(RateService::RestartPedestal, task.id, task.trace_id, &ctx.cancel)
            .await?;
        if !got_token {
            return reschedule_contended(
                ctx,
                task,
                reschedule_delay(task.restart_num),
                "restart token unavailable",
            )
            .await;
        }

        let lease_until = (Utc::now() + ChronoDuration::minutes(payload.interval)).timestamp();
        let namespace = match ctx
            .monitor
            .namespace_to_restart(lease_until, &payload.pedestal.ns_pattern, &trace_id)
            .await
        {
            Ok(Some(ns)) => ns,
            Ok(None) => {
                ctx.limiter
                    .release_token(RateService::RestartPedestal, task.id)
                    .await?;
                return reschedule_contended(
                    ctx,
                    task,
                    reschedule_delay(task.restart_num),
                    "no free namespace",
                )
                .await;
            }
            Err(e) => {
                ctx.limiter
                    .release_token(RateService::RestartPedestal, task.id)
                    .await?;
                return Err(e);
            }
        };

        // Anything that fails from here until the follow-up task is in
        // the queue gives the namespace back.
        let result = self
            .install_and_chain(ctx, task, &payload, &namespace)
            .await;

        ctx.limiter
            .release_token(RateService::RestartPedestal, task.id)
            .await?;

        match result {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                if let Err(release_err) = ctx.monitor.release_lock(&namespace, &trace_id).await {
                    tracing::warn!(
                        task_id = %task.id,
                        namespace = %namespace,
                        error = %release_err,
                        "failed to release namespace after install failure"
                    );
                }
                Err(e)
            }
        }
    }
}

impl RestartPedestalExecutor {
    async fn install_and_chain(
        &self,
        ctx: &ExecContext,
        task: &Task,
        payload: &RestartPedestalPayload,
        namespace: &str,
    ) -> Result<ExecOutcome> {
        ctx.installer
            .install(namespace, namespace_index(namespace), &payload.pedestal)
            .await
            .map_err(|e| {
                anyhow!(ExecError::Transient(
                    e.context(format!("pedestal install into {namespace} failed"))
                ))
            })?;

        update_task_state(
            ctx,
            task,
            TaskState::Completed,
            names::RESTART_PEDESTAL_COMPLETED,
        )
        .await?;
        ctx.publisher
            .publish(
                task,
                names::RESTART_PEDESTAL_COMPLETED,
                serde_json::json!({
                    "namespace": namespace,
                    "pedestal": payload.pedestal.name,
                }),
            )
            .await;

        // The injection fires `interval - fault_duration` minutes from
        // now, leaving the pedestal that long to settle.
        let execute_at = Utc::now()
            + ChronoDuration::minutes(payload.interval - payload.fault_duration);

        let inject_payload = merge_inject_payload(payload, namespace)
            .context("inject_payload is not a JSON object")?;
        let child = child_task(task, TaskKind::FaultInjection, inject_payload, execute_at, 0);

        ctx.queue
            .submit(&child)
            .await
            .context("failed to enqueue fault-injection task")?;

        tracing::info!(
            task_id = %task.id,
            child_task_id = %child.id,
            namespace = %namespace,
            execute_at = %execute_at,
            "pedestal restarted, fault injection scheduled"
        );

        Ok(ExecOutcome::Completed {
            event: names::RESTART_PEDESTAL_COMPLETED,
        })
    }
}

/// Fill the forwarded injection payload with the leased namespace and
/// pedestal identity.
fn merge_inject_payload(
    payload: &RestartPedestalPayload,
    namespace: &str,
) -> Result<serde_json::Value> {
    let mut inject = payload.inject_payload.clone();
    let map = inject
        .as_object_mut()
        .ok_or_else(|| anyhow!("expected object, got {}", payload.inject_payload))?;
    map.insert("namespace".to_owned(), serde_json::json!(namespace));
    map.insert("pedestal".to_owned(), serde_json::to_value(&payload.pedestal)?);
    map.insert("pedestal_id".to_owned(), serde_json::json!(payload.pedestal.id));
    Ok(inject)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::payloads::PedestalRef;

    #[test]
    fn merge_fills_namespace_and_pedestal() {
        let payload = RestartPedestalPayload {
            pedestal: PedestalRef {
                id: "ped-1".into(),
                name: "trainticket".into(),
                ns_pattern: "^ts[0-9]+$".into(),
                chart: "charts/tt".into(),
                values: serde_json::Value::Null,
            },
            interval: 10,
            fault_duration: 5,
            inject_payload: serde_json::json!({
                "benchmark": {"id": "b1", "name": "tt", "image_ref": "r/tt:1"},
                "nodes": [],
                "labels": {},
            }),
        };

        let merged = merge_inject_payload(&payload, "ts3").unwrap();
        assert_eq!(merged["namespace"], "ts3");
        assert_eq!(merged["pedestal_id"], "ped-1");
        assert_eq!(merged["pedestal"]["ns_pattern"], "^ts[0-9]+$");
        // Forwarded fields survive.
        assert_eq!(merged["benchmark"]["name"], "tt");
    }

    #[test]
    fn merge_rejects_non_object_payload() {
        let payload = RestartPedestalPayload {
            pedestal: PedestalRef {
                id: "p".into(),
                name: "p".into(),
                ns_pattern: ".*".into(),
                chart: "c".into(),
                values: serde_json::Value::Null,
            },
            interval: 10,
            fault_duration: 5,
            inject_payload: serde_json::json!([1, 2, 3]),
        };
        assert!(merge_inject_payload(&payload, "ts0").is_err());
    }
}
