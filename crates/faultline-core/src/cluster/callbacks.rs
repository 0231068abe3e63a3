//! Controller callbacks: what observed resource transitions mean for
//! the pipeline.

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use uuid::Uuid;

use faultline_db::models::{
    ExecutionState, InjectionState, RateService, Task, TaskKind, TaskState,
};
use faultline_db::queries::{containers, executions, injections};

use crate::error::ExecError;
use crate::events::names;
use crate::executor::payloads::{
    AlgorithmRef, BuildDatapackPayload, CollectResultPayload, DatapackSpec,
    FaultInjectionPayload, RunAlgorithmPayload,
};
use crate::executor::{child_task, transition_task};

use super::api::label_keys;
use super::chaos::FaultExperiment;
use super::controller::ClusterController;
use super::workqueue::WorkItem;

/// Recovery is re-checked this often, at most twice.
const RECOVERY_RETRY_DELAY: Duration = Duration::from_secs(60);
const RECOVERY_MAX_RETRIES: u32 = 2;

impl ClusterController {
    // -------------------------------------------------------------------
    // Chaos resources
    // -------------------------------------------------------------------

    pub(super) async fn handle_chaos_applied(
        &self,
        namespace: &str,
        obj: &FaultExperiment,
    ) -> Result<()> {
        let name = obj.name_any();
        let key = format!("{namespace}/{name}");
        let labels = obj.labels().clone();

        let Some(task) = self.task_for_labels(&labels).await? else {
            tracing::debug!(resource = %key, "chaos resource without task labels, ignoring");
            return Ok(());
        };

        let first_seen = self.seen_chaos.lock().await.insert(key.clone());
        if first_seen {
            // Add: the experiment exists in the cluster; the task is now
            // genuinely running.
            transition_task(
                &self.deps.pool,
                &self.deps.publisher,
                &task,
                TaskState::Running,
                names::TASK_STATE_UPDATE,
            )
            .await?;

            if let Some(injection) = labels.get(label_keys::INJECTION_NAME) {
                injections::set_resource_name(&self.deps.pool, injection, &name).await?;
            }
            tracing::info!(resource = %key, task_id = %task.id, "chaos resource observed");
            return Ok(());
        }

        // Update: inspect the experiment status.
        let Some(status) = obj.status.as_ref().map(|s| s.observed()) else {
            return Ok(());
        };

        if status.stopped_without_injecting() {
            let reason = if status.selected() == Some(false) {
                "experiment selected no targets"
            } else {
                "experiment stopped before injecting"
            };
            return self
                .handle_crd_failed(namespace, &name, &labels, &task, reason)
                .await;
        }

        if status.all_injected() == Some(true) {
            let newly_injected = self.injected.lock().await.insert(key.clone());
            if newly_injected {
                let duration_minutes = obj
                    .spec
                    .duration
                    .as_deref()
                    .and_then(parse_duration_minutes)
                    .unwrap_or(1);
                let injection = labels
                    .get(label_keys::INJECTION_NAME)
                    .cloned()
                    .unwrap_or_default();

                tracing::info!(
                    resource = %key,
                    duration_minutes = duration_minutes,
                    "all faults injected, recovery check scheduled"
                );
                self.work.schedule(
                    WorkItem::CheckRecovery {
                        namespace: namespace.to_owned(),
                        resource: name,
                        injection,
                        task_id: task.id,
                        injected_at: Utc::now(),
                        duration_minutes,
                        attempt: 0,
                    },
                    Duration::from_secs(duration_minutes.max(0) as u64 * 60),
                );
            }
        }

        Ok(())
    }

    pub(super) async fn handle_chaos_deleted(
        &self,
        namespace: &str,
        obj: &FaultExperiment,
    ) -> Result<()> {
        let name = obj.name_any();
        let key = format!("{namespace}/{name}");
        self.seen_chaos.lock().await.remove(&key);
        self.injected.lock().await.remove(&key);

        let Some(task) = self.task_for_labels(obj.labels()).await? else {
            return Ok(());
        };

        // The experiment is gone; the namespace goes back to the pool.
        let trace_id = task.trace_id.to_string();
        if let Err(e) = self.deps.monitor.release_lock(namespace, &trace_id).await {
            tracing::warn!(
                namespace = namespace,
                trace_id = %trace_id,
                error = %e,
                "lock release on chaos delete failed"
            );
        }
        tracing::info!(resource = %key, "chaos resource deleted");
        Ok(())
    }

    /// Drive one `CheckRecovery` work item. Returns the follow-up to
    /// schedule, if any.
    pub(super) async fn handle_work_item(
        &self,
        item: WorkItem,
    ) -> Result<Option<(WorkItem, Duration)>> {
        match item {
            WorkItem::CheckRecovery {
                namespace,
                resource,
                injection,
                task_id,
                injected_at,
                duration_minutes,
                attempt,
            } => {
                let status = self
                    .deps
                    .cluster
                    .get_chaos_status(&namespace, &resource)
                    .await?;

                match recovery_verdict(status.as_ref(), attempt) {
                    RecoveryVerdict::Recovered => {
                        self.handle_crd_succeeded(
                            &namespace,
                            &injection,
                            task_id,
                            injected_at,
                            Utc::now(),
                        )
                        .await?;
                        Ok(None)
                    }
                    RecoveryVerdict::Retry => {
                        tracing::info!(
                            resource = %resource,
                            attempt = attempt + 1,
                            "not yet recovered, re-checking"
                        );
                        Ok(Some((
                            WorkItem::CheckRecovery {
                                namespace,
                                resource,
                                injection,
                                task_id,
                                injected_at,
                                duration_minutes,
                                attempt: attempt + 1,
                            },
                            RECOVERY_RETRY_DELAY,
                        )))
                    }
                    RecoveryVerdict::BestEffort => {
                        // Retries exhausted: the injection itself
                        // succeeded, so report success with window times
                        // derived from the injection start and duration.
                        tracing::warn!(
                            resource = %resource,
                            "recovery never confirmed, proceeding with derived window"
                        );
                        let end = injected_at + chrono::Duration::minutes(duration_minutes);
                        self.handle_crd_succeeded(
                            &namespace,
                            &injection,
                            task_id,
                            injected_at,
                            end,
                        )
                        .await?;
                        Ok(None)
                    }
                }
            }
            WorkItem::DeleteChaosResource { namespace, name } => {
                self.deps
                    .cluster
                    .delete_chaos_resource(&namespace, &name)
                    .await?;
                Ok(None)
            }
            WorkItem::DeleteJob { namespace, name } => {
                self.deps.cluster.delete_job(&namespace, &name).await?;
                Ok(None)
            }
        }
    }

    /// The fault window ran to completion: persist it and move the
    /// pipeline on to the datapack build.
    pub(super) async fn handle_crd_succeeded(
        &self,
        namespace: &str,
        injection_name: &str,
        task_id: Uuid,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    ) -> Result<()> {
        let rows = injections::transition_state(
            &self.deps.pool,
            injection_name,
            InjectionState::Initial,
            InjectionState::InjectSuccess,
            Some(started_at),
            Some(ended_at),
        )
        .await?;
        if rows == 0 {
            // Another resource of this batch already drove the
            // transition.
            return Ok(());
        }

        let injection = injections::get_by_name(&self.deps.pool, injection_name)
            .await?
            .with_context(|| format!("injection {injection_name} vanished"))?;

        let task = faultline_db::queries::tasks::get_task(&self.deps.pool, task_id)
            .await?
            .with_context(|| format!("task {task_id} vanished"))?;

        self.deps
            .publisher
            .publish(
                &task,
                names::FAULT_INJECTION_SUCCEEDED,
                serde_json::json!({
                    "injection": injection_name,
                    "namespace": namespace,
                    "started_at": started_at,
                    "ended_at": ended_at,
                }),
            )
            .await;

        let completed = transition_task(
            &self.deps.pool,
            &self.deps.publisher,
            &task,
            TaskState::Completed,
            names::FAULT_INJECTION_SUCCEEDED,
        )
        .await?;
        if !completed {
            return Ok(());
        }

        // Next step: package the telemetry around the fault window.
        let payload: FaultInjectionPayload = serde_json::from_value(task.payload.clone())
            .map_err(|e| ExecError::Parse(format!("injection task {task_id}: {e}")))?;

        let datapack = DatapackSpec {
            name: injection.name.clone(),
            start_time: started_at.timestamp(),
            end_time: ended_at.timestamp(),
            pre_duration: injection.pre_duration as i64,
        };
        let build_payload = BuildDatapackPayload {
            benchmark: payload.benchmark,
            datapack,
            dataset_version_id: payload.dataset_version_id,
            labels: payload.labels,
            namespace: payload.namespace,
            rca_algorithms: payload.rca_algorithms,
        };
        let child = child_task(
            &task,
            TaskKind::BuildDatapack,
            serde_json::to_value(&build_payload)?,
            Utc::now(),
            0,
        );
        self.deps.queue.submit(&child).await?;

        tracing::info!(
            injection = injection_name,
            child_task_id = %child.id,
            "injection succeeded, datapack build enqueued"
        );
        Ok(())
    }

    /// The experiment failed before injecting; the injection row and
    /// task go to their failure states and the resources are cleaned up
    /// unless debugging wants them kept.
    pub(super) async fn handle_crd_failed(
        &self,
        namespace: &str,
        resource: &str,
        labels: &BTreeMap<String, String>,
        task: &Task,
        reason: &str,
    ) -> Result<()> {
        if let Some(injection) = labels.get(label_keys::INJECTION_NAME) {
            let rows = injections::transition_state(
                &self.deps.pool,
                injection,
                InjectionState::Initial,
                InjectionState::InjectFailed,
                None,
                Some(Utc::now()),
            )
            .await?;
            if rows == 0 {
                return Ok(());
            }
        }

        self.deps
            .publisher
            .publish(
                task,
                names::FAULT_INJECTION_FAILED,
                serde_json::json!({ "resource": resource, "reason": reason }),
            )
            .await;

        transition_task(
            &self.deps.pool,
            &self.deps.publisher,
            task,
            TaskState::Error,
            names::FAULT_INJECTION_FAILED,
        )
        .await?;

        if self.deps.config.debugging.enabled {
            tracing::warn!(
                resource = resource,
                reason = reason,
                "experiment failed; keeping resources for debugging"
            );
        } else {
            self.work.schedule(
                WorkItem::DeleteChaosResource {
                    namespace: namespace.to_owned(),
                    name: resource.to_owned(),
                },
                Duration::ZERO,
            );
        }
        Ok(())
    }

    // -------------------------------------------------------------------
    // Jobs
    // -------------------------------------------------------------------

    pub(super) async fn handle_job_applied(&self, job: &Job) -> Result<()> {
        let labels = job.labels().clone();
        let Some(task) = self.task_for_labels(&labels).await? else {
            return Ok(());
        };

        match job_outcome(job) {
            JobOutcome::Active => {
                transition_task(
                    &self.deps.pool,
                    &self.deps.publisher,
                    &task,
                    TaskState::Running,
                    names::TASK_STATE_UPDATE,
                )
                .await?;
                Ok(())
            }
            JobOutcome::Succeeded => self.handle_job_succeeded(&task, &labels).await,
            JobOutcome::Failed => {
                self.handle_job_failed(&task, &labels, &job.name_any(), "job failed")
                    .await
            }
        }
    }

    pub(super) async fn handle_job_succeeded(
        &self,
        task: &Task,
        labels: &BTreeMap<String, String>,
    ) -> Result<()> {
        match task.kind {
            TaskKind::BuildDatapack => {
                let payload: BuildDatapackPayload =
                    serde_json::from_value(task.payload.clone())
                        .map_err(|e| ExecError::Parse(e.to_string()))?;

                // The datapack shares its name with the injection batch;
                // move the row on when this pipeline has one.
                let _ = injections::transition_state(
                    &self.deps.pool,
                    &payload.datapack.name,
                    InjectionState::InjectSuccess,
                    InjectionState::BuildSuccess,
                    None,
                    None,
                )
                .await?;

                self.deps
                    .publisher
                    .publish(
                        task,
                        names::DATAPACK_BUILD_SUCCEEDED,
                        serde_json::json!({ "datapack": payload.datapack.name }),
                    )
                    .await;

                let completed = transition_task(
                    &self.deps.pool,
                    &self.deps.publisher,
                    task,
                    TaskState::Completed,
                    names::DATAPACK_BUILD_SUCCEEDED,
                )
                .await?;
                if !completed {
                    return Ok(());
                }

                self.enqueue_detector_run(task, &payload).await
            }
            TaskKind::RunAlgorithm => {
                self.deps
                    .limiter
                    .release_token(RateService::AlgoExecution, task.id)
                    .await?;

                let execution_id = labels
                    .get(label_keys::EXECUTION_ID)
                    .and_then(|v| Uuid::parse_str(v).ok());
                if let Some(execution_id) = execution_id {
                    executions::set_state(
                        &self.deps.pool,
                        execution_id,
                        ExecutionState::Success,
                        "job completed",
                    )
                    .await?;
                }

                self.deps
                    .publisher
                    .publish(
                        task,
                        names::ALGO_RUN_SUCCEEDED,
                        serde_json::json!({ "execution_id": execution_id }),
                    )
                    .await;

                let completed = transition_task(
                    &self.deps.pool,
                    &self.deps.publisher,
                    task,
                    TaskState::Completed,
                    names::ALGO_RUN_SUCCEEDED,
                )
                .await?;
                if !completed {
                    return Ok(());
                }

                let Some(execution_id) = execution_id else {
                    tracing::error!(task_id = %task.id, "algorithm job without execution label");
                    return Ok(());
                };

                let payload: RunAlgorithmPayload =
                    serde_json::from_value(task.payload.clone())
                        .map_err(|e| ExecError::Parse(e.to_string()))?;
                let collect = CollectResultPayload {
                    algorithm: payload.algorithm,
                    datapack: payload.datapack,
                    execution_id,
                    dataset_version_id: payload.dataset_version_id,
                    labels: payload.labels,
                    rca_algorithms: payload.rca_algorithms,
                };
                let child = child_task(
                    task,
                    TaskKind::CollectResult,
                    serde_json::to_value(&collect)?,
                    Utc::now(),
                    0,
                );
                self.deps.queue.submit(&child).await?;
                tracing::info!(
                    task_id = %task.id,
                    child_task_id = %child.id,
                    "algorithm run finished, result collection enqueued"
                );
                Ok(())
            }
            other => {
                tracing::debug!(kind = %other, "job success for unexpected task kind");
                Ok(())
            }
        }
    }

    pub(super) async fn handle_job_failed(
        &self,
        task: &Task,
        labels: &BTreeMap<String, String>,
        job_name: &str,
        reason: &str,
    ) -> Result<()> {
        let event = match task.kind {
            TaskKind::BuildDatapack => {
                let _ = injections::transition_state(
                    &self.deps.pool,
                    labels
                        .get(label_keys::DATAPACK)
                        .map(String::as_str)
                        .unwrap_or_default(),
                    InjectionState::InjectSuccess,
                    InjectionState::BuildFailed,
                    None,
                    None,
                )
                .await;
                names::DATAPACK_BUILD_FAILED
            }
            TaskKind::RunAlgorithm => {
                self.deps
                    .limiter
                    .release_token(RateService::AlgoExecution, task.id)
                    .await?;
                if let Some(execution_id) = labels
                    .get(label_keys::EXECUTION_ID)
                    .and_then(|v| Uuid::parse_str(v).ok())
                {
                    executions::set_state(
                        &self.deps.pool,
                        execution_id,
                        ExecutionState::Failed,
                        reason,
                    )
                    .await?;
                }
                names::ALGO_RUN_FAILED
            }
            _ => names::TASK_STATE_UPDATE,
        };

        self.deps
            .publisher
            .publish(
                task,
                event,
                serde_json::json!({ "job": job_name, "reason": reason }),
            )
            .await;

        let failed = transition_task(
            &self.deps.pool,
            &self.deps.publisher,
            task,
            TaskState::Error,
            event,
        )
        .await?;
        if !failed {
            return Ok(());
        }

        if self.deps.config.debugging.enabled {
            tracing::warn!(job = job_name, "job failed; keeping it for debugging");
        } else {
            self.work.schedule(
                WorkItem::DeleteJob {
                    namespace: self.deps.config.k8s.namespace.clone(),
                    name: job_name.to_owned(),
                },
                Duration::ZERO,
            );
        }
        Ok(())
    }

    /// After a datapack builds, the detector algorithm runs against it.
    async fn enqueue_detector_run(
        &self,
        task: &Task,
        payload: &BuildDatapackPayload,
    ) -> Result<()> {
        let detector_name = &self.deps.config.algo.detector;
        let Some(version) =
            containers::get(&self.deps.pool, detector_name, "latest").await?
        else {
            tracing::error!(
                detector = %detector_name,
                "no detector container registered; pipeline stops at datapack"
            );
            return Ok(());
        };

        let algorithm = AlgorithmRef {
            name: version.name.clone(),
            version_id: version.id.to_string(),
            image_ref: version.image_ref.clone(),
            command: (!version.command.is_empty()).then(|| version.command.clone()),
        };
        let run = RunAlgorithmPayload {
            algorithm,
            datapack: payload.datapack.clone(),
            dataset_version_id: payload.dataset_version_id.clone(),
            labels: payload.labels.clone(),
            rca_algorithms: payload.rca_algorithms.clone(),
        };
        let child = child_task(
            task,
            TaskKind::RunAlgorithm,
            serde_json::to_value(&run)?,
            Utc::now(),
            0,
        );
        self.deps.queue.submit(&child).await?;
        tracing::info!(
            task_id = %task.id,
            child_task_id = %child.id,
            detector = %detector_name,
            "detector run enqueued"
        );
        Ok(())
    }

    // -------------------------------------------------------------------
    // Pods
    // -------------------------------------------------------------------

    /// A pod stuck in `ImagePullBackOff` never lets its job finish;
    /// force the job down its failure path.
    pub(super) async fn handle_pod_applied(&self, pod: &Pod) -> Result<()> {
        if !pod_image_pull_backoff(pod) {
            return Ok(());
        }

        let Some(job_name) = pod
            .metadata
            .owner_references
            .as_ref()
            .and_then(|refs| refs.iter().find(|r| r.kind == "Job"))
            .map(|r| r.name.clone())
        else {
            return Ok(());
        };

        let labels = pod.labels().clone();
        let Some(task) = self.task_for_labels(&labels).await? else {
            return Ok(());
        };

        tracing::warn!(
            pod = %pod.name_any(),
            job = %job_name,
            "pod in ImagePullBackOff, force-failing its job"
        );
        self.handle_job_failed(&task, &labels, &job_name, "ImagePullBackOff")
            .await
    }
}

/// Decision for one recovery check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum RecoveryVerdict {
    Recovered,
    Retry,
    /// Retries exhausted; report success with a derived window.
    BestEffort,
}

/// Decide what a recovery check does with the observed status.
///
/// A missing resource or an unrecovered one retries up to
/// [`RECOVERY_MAX_RETRIES`] times, then falls back to best-effort
/// success.
pub(super) fn recovery_verdict(status: Option<&super::api::ChaosStatus>, attempt: u32) -> RecoveryVerdict {
    if status.and_then(|s| s.all_recovered()) == Some(true) {
        return RecoveryVerdict::Recovered;
    }
    if attempt < RECOVERY_MAX_RETRIES {
        return RecoveryVerdict::Retry;
    }
    RecoveryVerdict::BestEffort
}

/// Terminal outcome of a job, from its status conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobOutcome {
    Active,
    Succeeded,
    Failed,
}

fn job_outcome(job: &Job) -> JobOutcome {
    let Some(status) = job.status.as_ref() else {
        return JobOutcome::Active;
    };
    if let Some(conditions) = &status.conditions {
        for condition in conditions {
            if condition.status != "True" {
                continue;
            }
            match condition.type_.as_str() {
                "Complete" => return JobOutcome::Succeeded,
                "Failed" => return JobOutcome::Failed,
                _ => {}
            }
        }
    }
    if status.succeeded.unwrap_or(0) > 0 {
        return JobOutcome::Succeeded;
    }
    JobOutcome::Active
}

/// Whether any container of a pod is waiting on `ImagePullBackOff`.
fn pod_image_pull_backoff(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .is_some_and(|statuses| {
            statuses.iter().any(|cs| {
                cs.state
                    .as_ref()
                    .and_then(|s| s.waiting.as_ref())
                    .and_then(|w| w.reason.as_deref())
                    .is_some_and(|reason| {
                        reason == "ImagePullBackOff" || reason == "ErrImagePull"
                    })
            })
        })
}

/// Parse an engine duration string (`"5m"`, `"90s"`, `"2h"`) into whole
/// minutes, rounding up sub-minute values.
fn parse_duration_minutes(s: &str) -> Option<i64> {
    let s = s.trim();
    let (value, unit) = s.split_at(s.len().checked_sub(1)?);
    let value: i64 = value.parse().ok()?;
    match unit {
        "m" => Some(value),
        "s" => Some(div_ceil_i64(value, 60)),
        "h" => Some(value * 60),
        _ => None,
    }
}

/// Signed integer division rounded towards positive infinity.
///
/// Equivalent to the standard library's `i64::div_ceil`, which is not yet
/// stable for signed integers on this toolchain.
fn div_ceil_i64(lhs: i64, rhs: i64) -> i64 {
    let d = lhs.wrapping_div(rhs);
    let r = lhs.wrapping_rem(rhs);
    if (r > 0 && rhs > 0) || (r < 0 && rhs < 0) {
        d + 1
    } else {
        d
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::batch::v1::JobStatus;

    #[test]
    fn parse_duration_minutes_units() {
        assert_eq!(parse_duration_minutes("5m"), Some(5));
        assert_eq!(parse_duration_minutes("90s"), Some(2));
        assert_eq!(parse_duration_minutes("60s"), Some(1));
        assert_eq!(parse_duration_minutes("2h"), Some(120));
        assert_eq!(parse_duration_minutes("abc"), None);
        assert_eq!(parse_duration_minutes(""), None);
    }

    #[test]
    fn recovery_verdict_schedule() {
        use crate::cluster::api::{ChaosStatus, conditions};
        use std::collections::BTreeMap;

        let recovered = ChaosStatus {
            desired_phase: Some("Stop".into()),
            conditions: BTreeMap::from([(conditions::ALL_RECOVERED.to_owned(), true)]),
        };
        let unrecovered = ChaosStatus {
            desired_phase: Some("Stop".into()),
            conditions: BTreeMap::from([(conditions::ALL_RECOVERED.to_owned(), false)]),
        };

        assert_eq!(
            recovery_verdict(Some(&recovered), 0),
            RecoveryVerdict::Recovered
        );
        // Two retries, then best-effort success: the scenario of a fault
        // whose targets never report recovery.
        assert_eq!(
            recovery_verdict(Some(&unrecovered), 0),
            RecoveryVerdict::Retry
        );
        assert_eq!(
            recovery_verdict(Some(&unrecovered), 1),
            RecoveryVerdict::Retry
        );
        assert_eq!(
            recovery_verdict(Some(&unrecovered), 2),
            RecoveryVerdict::BestEffort
        );
        // A vanished resource behaves like an unrecovered one.
        assert_eq!(recovery_verdict(None, 2), RecoveryVerdict::BestEffort);
    }

    #[test]
    fn job_outcome_from_conditions() {
        use k8s_openapi::api::batch::v1::JobCondition;

        let mut job = Job::default();
        assert_eq!(job_outcome(&job), JobOutcome::Active);

        job.status = Some(JobStatus {
            conditions: Some(vec![JobCondition {
                type_: "Complete".into(),
                status: "True".into(),
                ..Default::default()
            }]),
            ..Default::default()
        });
        assert_eq!(job_outcome(&job), JobOutcome::Succeeded);

        job.status = Some(JobStatus {
            conditions: Some(vec![JobCondition {
                type_: "Failed".into(),
                status: "True".into(),
                ..Default::default()
            }]),
            ..Default::default()
        });
        assert_eq!(job_outcome(&job), JobOutcome::Failed);

        // A False condition is not terminal.
        job.status = Some(JobStatus {
            conditions: Some(vec![JobCondition {
                type_: "Failed".into(),
                status: "False".into(),
                ..Default::default()
            }]),
            ..Default::default()
        });
        assert_eq!(job_outcome(&job), JobOutcome::Active);
    }
}
