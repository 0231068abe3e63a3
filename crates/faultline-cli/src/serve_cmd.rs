//! The `serve` command: wire up and run the engine.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use faultline_core::cluster::api::{ChaosResourceRequest, ChaosStatus, ClusterApi, JobRequest};
use faultline_core::cluster::controller::{ClusterController, ControllerDeps};
use faultline_core::cluster::kube_impl::KubeCluster;
use faultline_core::consumer::Consumer;
use faultline_core::events::{EventPublisher, names};
use faultline_core::executor::payloads::{BuildOptions, PedestalRef};
use faultline_core::executor::{
    BuildPrimitive, ExecContext, ExecutorRegistry, PedestalInstaller,
};
use faultline_core::monitor::NamespaceMonitor;
use faultline_core::queue::QueueStore;
use faultline_core::ratelimit::RateLimiter;
use faultline_core::scheduler;
use faultline_db::models::TaskState;
use faultline_db::queries::tasks as task_db;
use faultline_db::pool;

use crate::config::ResolvedConfig;

pub async fn run(resolved: ResolvedConfig, no_controller: bool) -> Result<()> {
    let db_config = resolved
        .db
        .clone()
        .with_application_name("faultline-serve");
    let db = pool::create_pool(&db_config).await?;
    let engine = Arc::new(resolved.engine);

    let queue = QueueStore::new(db.clone());
    queue
        .set_max_concurrency(engine.system.max_concurrency)
        .await?;

    let monitor = Arc::new(NamespaceMonitor::new(
        db.clone(),
        engine.k8s.chaos_namespaces.iter().cloned(),
    ));
    monitor.refresh_namespaces().await?;

    let limiter = Arc::new(RateLimiter::new(db.clone(), &engine.rate_limiting));
    let publisher = EventPublisher::new(db.clone());
    let cancel = CancellationToken::new();

    // Cluster access: a live client when available, otherwise (with
    // --no-controller) a dry-run stand-in for local development.
    let kube_client = match kube::Client::try_default().await {
        Ok(client) => Some(client),
        Err(e) if no_controller => {
            tracing::warn!(error = %e, "no cluster access, submissions will be dry-run");
            None
        }
        Err(e) => return Err(e).context("failed to build Kubernetes client"),
    };
    let cluster: Arc<dyn ClusterApi> = match &kube_client {
        Some(client) => Arc::new(KubeCluster::new(client.clone())),
        None => Arc::new(DryRunCluster),
    };

    let ctx = ExecContext {
        pool: db.clone(),
        queue: queue.clone(),
        monitor: Arc::clone(&monitor),
        limiter: Arc::clone(&limiter),
        publisher: publisher.clone(),
        cluster: Arc::clone(&cluster),
        builder: Arc::new(DockerBuild),
        installer: Arc::new(HelmInstaller),
        config: Arc::clone(&engine),
        cancel: cancel.clone(),
    };

    let registry = Arc::new(ExecutorRegistry::with_defaults());
    let consumer = Arc::new(Consumer::new(ctx, registry));

    // Restart recovery before taking new work.
    let recovered = consumer.recover_orphans().await?;
    if recovered > 0 {
        tracing::warn!(count = recovered, "re-queued orphaned tasks");
    }

    let scheduler_handle = tokio::spawn(scheduler::run(queue.clone(), cancel.clone()));
    let consumer_handle = tokio::spawn(Arc::clone(&consumer).run(cancel.clone()));

    if let Some(client) = kube_client {
        if !no_controller {
            let controller = ClusterController::new(
                client,
                ControllerDeps {
                    pool: db.clone(),
                    queue: queue.clone(),
                    monitor: Arc::clone(&monitor),
                    limiter: Arc::clone(&limiter),
                    publisher: publisher.clone(),
                    cluster: Arc::clone(&cluster),
                    config: Arc::clone(&engine),
                },
                cancel.clone(),
            );
            controller.start().await?;
        }
    }

    tracing::info!("engine running; ctrl-c to stop");
    tokio::signal::ctrl_c().await.context("signal handler")?;
    tracing::info!("shutting down");
    cancel.cancel();

    let _ = consumer_handle.await;
    let _ = scheduler_handle.await;
    Ok(())
}

/// Cancel a queued task from the CLI.
///
/// Only queued tasks can be cancelled from outside the serve process; a
/// running task's context lives in the worker that owns it.
pub async fn cancel(resolved: ResolvedConfig, task_id: Uuid) -> Result<()> {
    let db = pool::create_pool(&resolved.db).await?;
    let queue = QueueStore::new(db.clone());

    match queue.remove(task_id).await {
        Ok(tier) => {
            task_db::update_task_state(
                &db,
                task_id,
                TaskState::Cancelled,
                names::TASK_CANCELLED,
                None,
                None,
            )
            .await?;
            println!("cancelled task {task_id} (was {tier})");
            Ok(())
        }
        Err(_) => {
            let task = task_db::get_task(&db, task_id).await?;
            match task {
                Some(t) if t.state == TaskState::Running => {
                    bail!("task {task_id} is running; cancel it via the serve process")
                }
                Some(t) => bail!("task {task_id} is {} and not queued", t.state),
                None => bail!("task {task_id} not found"),
            }
        }
    }
}

// -----------------------------------------------------------------------
// Default primitives
// -----------------------------------------------------------------------

/// Image builds via the local docker CLI.
struct DockerBuild;

#[async_trait]
impl BuildPrimitive for DockerBuild {
    async fn build_and_push(
        &self,
        image_ref: &str,
        source_path: &Path,
        options: &BuildOptions,
    ) -> Result<()> {
        let context_dir = if options.context_dir.is_empty() {
            source_path.to_path_buf()
        } else {
            source_path.join(&options.context_dir)
        };

        let mut build = tokio::process::Command::new("docker");
        build.arg("build").arg("-t").arg(image_ref);
        if !options.dockerfile_path.is_empty() {
            build.arg("-f").arg(source_path.join(&options.dockerfile_path));
        }
        if let Some(target) = &options.target {
            build.arg("--target").arg(target);
        }
        for (key, value) in &options.build_args {
            build.arg("--build-arg").arg(format!("{key}={value}"));
        }
        build.arg(&context_dir);

        let output = build.output().await.context("failed to run docker build")?;
        if !output.status.success() {
            bail!(
                "docker build failed: {}",
                String::from_utf8_lossy(&output.stderr)
            );
        }

        let output = tokio::process::Command::new("docker")
            .arg("push")
            .arg(image_ref)
            .output()
            .await
            .context("failed to run docker push")?;
        if !output.status.success() {
            bail!(
                "docker push failed: {}",
                String::from_utf8_lossy(&output.stderr)
            );
        }
        Ok(())
    }
}

/// Pedestal installs via the helm CLI, templating per-namespace
/// parameters from the namespace index.
struct HelmInstaller;

#[async_trait]
impl PedestalInstaller for HelmInstaller {
    async fn install(&self, namespace: &str, ns_index: u32, pedestal: &PedestalRef) -> Result<()> {
        let release = format!("{}-{namespace}", pedestal.name);
        let mut cmd = tokio::process::Command::new("helm");
        cmd.args(["upgrade", "--install", &release, &pedestal.chart])
            .args(["--namespace", namespace])
            .args(["--set", &format!("global.nsIndex={ns_index}")])
            .arg("--wait");

        if let serde_json::Value::Object(values) = &pedestal.values {
            for (key, value) in values {
                let rendered = match value {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                cmd.args(["--set", &format!("{key}={rendered}")]);
            }
        }

        let output = cmd.output().await.context("failed to run helm")?;
        if !output.status.success() {
            bail!(
                "helm install of {release} failed: {}",
                String::from_utf8_lossy(&output.stderr)
            );
        }
        Ok(())
    }
}

/// Logs submissions instead of touching a cluster. Local development
/// only.
struct DryRunCluster;

#[async_trait]
impl ClusterApi for DryRunCluster {
    async fn create_chaos_resources(
        &self,
        namespace: &str,
        batch: &[ChaosResourceRequest],
    ) -> Result<()> {
        tracing::info!(namespace = namespace, count = batch.len(), "dry-run: chaos resources");
        Ok(())
    }

    async fn submit_job(&self, job: &JobRequest) -> Result<()> {
        tracing::info!(namespace = %job.namespace, name = %job.name, "dry-run: job");
        Ok(())
    }

    async fn get_chaos_status(&self, _: &str, _: &str) -> Result<Option<ChaosStatus>> {
        Ok(None)
    }

    async fn delete_chaos_resource(&self, _: &str, _: &str) -> Result<()> {
        Ok(())
    }

    async fn delete_job(&self, _: &str, _: &str) -> Result<()> {
        Ok(())
    }
}
