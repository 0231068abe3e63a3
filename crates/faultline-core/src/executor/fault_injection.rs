//! FaultInjection executor: persist the injection batch and create its
//! chaos resources in the leased namespace.
//!
//! The task stays `running` after submission; the cluster controller
//! completes or fails it from the resources' observed lifecycle, and
//! releases the namespace lock when they reach a terminal state.

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use faultline_db::models::{InjectionState, Task, TaskKind};
use faultline_db::queries::{injections, labels as label_db};

use crate::cluster::api::{
    ChaosResourceRequest, carrier_annotations, identity_labels, label_keys,
};
use crate::error::ExecError;
use crate::events::names;

use super::payloads::{FaultInjectionPayload, FaultNode, parse_payload};
use super::{ExecContext, ExecOutcome, Executor};

pub struct FaultInjectionExecutor;

#[async_trait]
impl Executor for FaultInjectionExecutor {
    fn kind(&self) -> TaskKind {
        TaskKind::FaultInjection
    }

    fn validate_payload(&self, payload: &serde_json::Value) -> Result<(), ExecError> {
        let parsed: FaultInjectionPayload = serde_json::from_value(payload.clone())
            .map_err(|e| ExecError::Parse(e.to_string()))?;
        if parsed.nodes.is_empty() {
            return Err(ExecError::Parse("no fault nodes".to_owned()));
        }
        Ok(())
    }

    async fn execute(&self, ctx: &ExecContext, task: &Task) -> Result<ExecOutcome> {
        let payload: FaultInjectionPayload = parse_payload(task)?;
        let trace_id = task.trace_id.to_string();

        // The restart step leased this namespace for us; injecting into
        // a namespace we lost would fault someone else's experiment.
        if !ctx.monitor.is_held_by(&payload.namespace, &trace_id).await? {
            return Err(ExecError::Business(format!(
                "namespace {} is not leased by trace {}",
                payload.namespace, trace_id
            ))
            .into());
        }

        if !ctx.config.injection.enable_duplicate {
            if let Some(existing) = injections::get_by_task(&ctx.pool, task.id).await? {
                if existing.state != InjectionState::Initial {
                    return Err(ExecError::Business(format!(
                        "task {} already produced injection {} in state {}",
                        task.id, existing.name, existing.state
                    ))
                    .into());
                }
            }
        }

        let batch_name = format!("inj-{}", Uuid::now_v7().simple());

        let mut engine_specs = Vec::with_capacity(payload.nodes.len());
        let mut display_configs = Vec::with_capacity(payload.nodes.len());
        let mut groundtruths = Vec::with_capacity(payload.nodes.len());
        for node in &payload.nodes {
            engine_specs.push(engine_spec(node));
            display_configs.push(display_config(node, &payload.namespace));
            groundtruths.push(groundtruth(node, &payload.namespace));
        }

        let fault_type = payload
            .nodes
            .first()
            .map(|n| n.fault_type.clone())
            .unwrap_or_default();
        let category = payload
            .nodes
            .first()
            .map(|n| n.category.clone())
            .unwrap_or_default();

        let injection = injections::insert(
            &ctx.pool,
            &injections::NewInjection {
                id: Uuid::now_v7(),
                name: &batch_name,
                fault_type: &fault_type,
                category: &category,
                engine_config: serde_json::json!(engine_specs),
                display_config: serde_json::json!(display_configs),
                groundtruths: serde_json::json!(groundtruths),
                pre_duration: payload.pre_duration as i32,
                task_id: task.id,
                benchmark_id: &payload.benchmark.id,
                pedestal_id: &payload.pedestal_id,
            },
        )
        .await
        .map_err(ExecError::Transient)?;

        for (key, value) in &payload.labels {
            let label = label_db::get_or_create(&ctx.pool, key, value).await?;
            label_db::attach_to_injection(&ctx.pool, injection.id, label.id).await?;
        }

        let mut labels = identity_labels(task, &ctx.config.k8s.app_id);
        labels.insert(label_keys::INJECTION_NAME.to_owned(), batch_name.clone());
        let annotations = carrier_annotations(task);

        let batch: Vec<ChaosResourceRequest> = payload
            .nodes
            .iter()
            .enumerate()
            .map(|(idx, node)| ChaosResourceRequest {
                name: format!("{batch_name}-{idx}"),
                action: node.fault_type.clone(),
                duration_minutes: node.duration,
                engine_spec: node.spec.clone(),
                labels: labels.clone(),
                annotations: annotations.clone(),
            })
            .collect();

        ctx.cluster
            .create_chaos_resources(&payload.namespace, &batch)
            .await
            .map_err(ExecError::Transient)?;

        ctx.publisher
            .publish(
                task,
                names::FAULT_INJECTION_STARTED,
                serde_json::json!({
                    "injection": batch_name,
                    "namespace": payload.namespace,
                    "nodes": payload.nodes.len(),
                }),
            )
            .await;

        tracing::info!(
            task_id = %task.id,
            injection = %batch_name,
            namespace = %payload.namespace,
            nodes = payload.nodes.len(),
            "fault injection submitted"
        );

        Ok(ExecOutcome::InFlight {
            event: names::FAULT_INJECTION_STARTED,
        })
    }
}

/// Engine-facing spec for one fault node.
fn engine_spec(node: &FaultNode) -> serde_json::Value {
    serde_json::json!({
        "action": node.fault_type,
        "duration": format!("{}m", node.duration),
        "spec": node.spec,
    })
}

/// Operator-facing rendering of one fault node.
fn display_config(node: &FaultNode, namespace: &str) -> serde_json::Value {
    serde_json::json!({
        "fault_type": node.fault_type,
        "category": node.category,
        "duration_minutes": node.duration,
        "namespace": namespace,
    })
}

/// Groundtruth record scored against algorithm output.
fn groundtruth(node: &FaultNode, namespace: &str) -> serde_json::Value {
    serde_json::json!({
        "namespace": namespace,
        "fault_type": node.fault_type,
        "category": node.category,
        "target": node.spec.get("selector").cloned().unwrap_or(serde_json::Value::Null),
    })
}
