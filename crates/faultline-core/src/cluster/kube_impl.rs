//! Kubernetes-backed [`ClusterApi`].

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{
    Container, EnvVar, PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec, Volume,
    VolumeMount,
};
use kube::api::{Api, DeleteParams, ObjectMeta, Patch, PatchParams, PostParams};
use kube::Client;

use super::api::{ChaosResourceRequest, ChaosStatus, ClusterApi, JobRequest};
use super::chaos::{FaultExperiment, FaultExperimentSpec};

/// Deletion is best-effort and bounded.
const DELETE_TIMEOUT: Duration = Duration::from_secs(10);

/// Name of the persistent claim backing job workspaces.
const WORKSPACE_CLAIM: &str = "faultline-data";
const WORKSPACE_VOLUME: &str = "workspace";

/// Image used by the output-directory init container.
const INIT_IMAGE: &str = "busybox:1.36";

/// [`ClusterApi`] over a live cluster.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn experiments(&self, namespace: &str) -> Api<FaultExperiment> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn jobs(&self, namespace: &str) -> Api<Job> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn create_chaos_resources(
        &self,
        namespace: &str,
        batch: &[ChaosResourceRequest],
    ) -> Result<()> {
        let api = self.experiments(namespace);

        for request in batch {
            let engine = match &request.engine_spec {
                serde_json::Value::Object(map) => {
                    map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
                }
                _ => Default::default(),
            };

            let mut experiment = FaultExperiment::new(
                &request.name,
                FaultExperimentSpec {
                    action: request.action.clone(),
                    duration: Some(format!("{}m", request.duration_minutes)),
                    engine,
                },
            );
            experiment.metadata.labels = Some(request.labels.clone());
            experiment.metadata.annotations = Some(request.annotations.clone());

            api.create(&PostParams::default(), &experiment)
                .await
                .with_context(|| {
                    format!("failed to create chaos resource {}/{}", namespace, request.name)
                })?;

            tracing::info!(
                namespace = namespace,
                name = %request.name,
                action = %request.action,
                "chaos resource created"
            );
        }

        Ok(())
    }

    async fn submit_job(&self, job: &JobRequest) -> Result<()> {
        let api = self.jobs(&job.namespace);
        let rendered = render_job(job);

        api.create(&PostParams::default(), &rendered)
            .await
            .with_context(|| format!("failed to submit job {}/{}", job.namespace, job.name))?;

        tracing::info!(namespace = %job.namespace, name = %job.name, "job submitted");
        Ok(())
    }

    async fn get_chaos_status(&self, namespace: &str, name: &str) -> Result<Option<ChaosStatus>> {
        let api = self.experiments(namespace);
        let experiment = api
            .get_opt(name)
            .await
            .with_context(|| format!("failed to fetch chaos resource {namespace}/{name}"))?;

        Ok(experiment
            .and_then(|e| e.status)
            .map(|status| status.observed()))
    }

    async fn delete_chaos_resource(&self, namespace: &str, name: &str) -> Result<()> {
        let api = self.experiments(namespace);
        let deletion = async {
            // Clear finalizers first so the delete cannot hang on a
            // wedged engine. Idempotent.
            let clear = serde_json::json!({"metadata": {"finalizers": null}});
            if let Err(e) = api
                .patch(name, &PatchParams::default(), &Patch::Merge(&clear))
                .await
            {
                tracing::debug!(
                    namespace = namespace,
                    name = name,
                    error = %e,
                    "finalizer clear skipped"
                );
            }
            api.delete(name, &DeleteParams::default()).await
        };

        match tokio::time::timeout(DELETE_TIMEOUT, deletion).await {
            Ok(Ok(_)) => {
                tracing::info!(namespace = namespace, name = name, "chaos resource deleted");
            }
            Ok(Err(kube::Error::Api(e))) if e.code == 404 => {}
            Ok(Err(e)) => {
                tracing::warn!(
                    namespace = namespace,
                    name = name,
                    error = %e,
                    "chaos resource deletion failed (best-effort)"
                );
            }
            Err(_) => {
                tracing::warn!(
                    namespace = namespace,
                    name = name,
                    "chaos resource deletion timed out (best-effort)"
                );
            }
        }
        Ok(())
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<()> {
        let api = self.jobs(namespace);
        // Foreground propagation takes the pods down with the job.
        let params = DeleteParams::foreground();

        match tokio::time::timeout(DELETE_TIMEOUT, api.delete(name, &params)).await {
            Ok(Ok(_)) => {
                tracing::info!(namespace = namespace, name = name, "job deleted");
            }
            Ok(Err(kube::Error::Api(e))) if e.code == 404 => {}
            Ok(Err(e)) => {
                tracing::warn!(
                    namespace = namespace,
                    name = name,
                    error = %e,
                    "job deletion failed (best-effort)"
                );
            }
            Err(_) => {
                tracing::warn!(
                    namespace = namespace,
                    name = name,
                    "job deletion timed out (best-effort)"
                );
            }
        }
        Ok(())
    }
}

/// Render a [`JobRequest`] into a batch/v1 Job.
fn render_job(job: &JobRequest) -> Job {
    let env: Vec<EnvVar> = job
        .env
        .iter()
        .map(|(name, value)| EnvVar {
            name: name.clone(),
            value: Some(value.clone()),
            ..Default::default()
        })
        .collect();

    let volume_mount = VolumeMount {
        name: WORKSPACE_VOLUME.to_owned(),
        mount_path: job.volume_mount_path.clone(),
        ..Default::default()
    };

    let init_containers = job.create_output_dir.as_ref().map(|dir| {
        vec![Container {
            name: "prepare-output".to_owned(),
            image: Some(INIT_IMAGE.to_owned()),
            command: Some(vec![
                "sh".to_owned(),
                "-c".to_owned(),
                format!("mkdir -p {dir}"),
            ]),
            volume_mounts: Some(vec![volume_mount.clone()]),
            ..Default::default()
        }]
    });

    let container = Container {
        name: "runner".to_owned(),
        image: Some(job.image.clone()),
        command: (!job.command.is_empty()).then(|| job.command.clone()),
        env: Some(env),
        volume_mounts: Some(vec![volume_mount]),
        ..Default::default()
    };

    Job {
        metadata: ObjectMeta {
            name: Some(job.name.clone()),
            namespace: Some(job.namespace.clone()),
            labels: Some(job.labels.clone()),
            annotations: Some(job.annotations.clone()),
            ..Default::default()
        },
        spec: Some(JobSpec {
            backoff_limit: Some(0),
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(job.labels.clone()),
                    annotations: Some(job.annotations.clone()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    restart_policy: Some("Never".to_owned()),
                    init_containers,
                    containers: vec![container],
                    volumes: Some(vec![Volume {
                        name: WORKSPACE_VOLUME.to_owned(),
                        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                            claim_name: WORKSPACE_CLAIM.to_owned(),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn request() -> JobRequest {
        JobRequest {
            name: "dp-build-1".into(),
            namespace: "faultline".into(),
            image: "registry.local/bench:1".into(),
            command: vec![],
            env: vec![("INPUT_PATH".into(), "/data/dp1/input".into())],
            labels: BTreeMap::from([("app_id".into(), "faultline".into())]),
            annotations: BTreeMap::new(),
            volume_mount_path: "/data".into(),
            create_output_dir: Some("/data/dp1/output".into()),
        }
    }

    #[test]
    fn render_job_wires_init_container() {
        let job = render_job(&request());
        let spec = job.spec.unwrap();
        assert_eq!(spec.backoff_limit, Some(0));

        let pod = spec.template.spec.unwrap();
        assert_eq!(pod.restart_policy.as_deref(), Some("Never"));

        let init = pod.init_containers.unwrap();
        assert_eq!(init.len(), 1);
        let cmd = init[0].command.as_ref().unwrap().join(" ");
        assert!(cmd.contains("mkdir -p /data/dp1/output"));

        let runner = &pod.containers[0];
        assert_eq!(runner.image.as_deref(), Some("registry.local/bench:1"));
        // Empty command defers to the image entrypoint.
        assert!(runner.command.is_none());
    }

    #[test]
    fn render_job_propagates_labels_to_pods() {
        let job = render_job(&request());
        let pod_meta = job.spec.unwrap().template.metadata.unwrap();
        assert_eq!(
            pod_meta.labels.unwrap().get("app_id"),
            Some(&"faultline".to_owned())
        );
    }
}
