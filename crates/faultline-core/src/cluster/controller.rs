//! Cluster resource controller.
//!
//! Watches chaos experiments across the environment namespaces and jobs
//! and pods in the controller's own namespace, filtered to this
//! application's objects by label. Observed transitions become pipeline
//! events: task state updates, injection transitions, follow-up task
//! enqueues, namespace lock releases, and deferred work-queue items.
//!
//! Watchers cannot be stopped mid-life, so namespace removal only marks
//! the namespace inactive and handlers drop its events. The active flag
//! is set *before* a watcher starts; otherwise the synthetic add events
//! replayed during the initial list would be lost.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::TryStreamExt;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use kube::api::Api;
use kube::runtime::watcher;
use kube::{Client, ResourceExt};
use sqlx::PgPool;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use faultline_db::models::Task;
use faultline_db::queries::tasks as task_db;

use crate::config::EngineConfig;
use crate::events::EventPublisher;
use crate::monitor::NamespaceMonitor;
use crate::queue::QueueStore;
use crate::ratelimit::RateLimiter;

use super::api::{ClusterApi, label_keys};
use super::chaos::FaultExperiment;
use super::workqueue::{WorkQueue, spawn_worker};

/// Pause after a watcher stream error before resuming.
const WATCH_ERROR_BACKOFF: Duration = Duration::from_secs(1);

/// Shared dependencies for the controller's callbacks.
pub struct ControllerDeps {
    pub pool: PgPool,
    pub queue: QueueStore,
    pub monitor: Arc<NamespaceMonitor>,
    pub limiter: Arc<RateLimiter>,
    pub publisher: EventPublisher,
    pub cluster: Arc<dyn ClusterApi>,
    pub config: Arc<EngineConfig>,
}

/// The controller singleton.
pub struct ClusterController {
    client: Client,
    pub(super) deps: ControllerDeps,
    /// Namespaces whose events are currently processed.
    active: RwLock<HashSet<String>>,
    /// Namespaces that already have a watcher running.
    watched: RwLock<HashSet<String>>,
    /// Chaos resources seen at least once (`ns/name`), to split add
    /// from update.
    pub(super) seen_chaos: Mutex<HashSet<String>>,
    /// Chaos resources whose `AllInjected` was already observed true.
    pub(super) injected: Mutex<HashSet<String>>,
    pub(super) work: WorkQueue,
    cancel: CancellationToken,
}

impl ClusterController {
    /// Build the controller and start its work-queue worker. Watchers
    /// start in [`Self::start`].
    pub fn new(client: Client, deps: ControllerDeps, cancel: CancellationToken) -> Arc<Self> {
        // Two-phase init: the work queue worker needs the Arc'd
        // controller as its handler.
        Arc::new_cyclic(|weak: &std::sync::Weak<Self>| {
            let handler = WeakHandler {
                controller: weak.clone(),
            };
            let work = spawn_worker(Arc::new(handler), cancel.clone());
            Self {
                client,
                deps,
                active: RwLock::new(HashSet::new()),
                watched: RwLock::new(HashSet::new()),
                seen_chaos: Mutex::new(HashSet::new()),
                injected: Mutex::new(HashSet::new()),
                work,
                cancel,
            }
        })
    }

    /// Start watchers: chaos experiments in every configured
    /// environment namespace, jobs and pods in our own.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let namespaces = self.deps.config.k8s.chaos_namespaces.clone();
        self.add_namespace_informers(&namespaces).await;

        self.spawn_job_watcher();
        self.spawn_pod_watcher();

        tracing::info!(
            namespaces = namespaces.len(),
            own_namespace = %self.deps.config.k8s.namespace,
            "cluster controller started"
        );
        Ok(())
    }

    /// Label selector restricting watchers to our objects.
    fn selector(&self) -> String {
        format!("{}={}", label_keys::APP_ID, self.deps.config.k8s.app_id)
    }

    /// Whether events from a namespace should be processed.
    pub(super) async fn is_namespace_active(&self, namespace: &str) -> bool {
        self.active.read().await.contains(namespace)
    }

    /// Begin watching chaos resources in the given namespaces.
    ///
    /// Idempotent: already-watched namespaces are only re-activated.
    /// The active flag is set before the watcher starts so no event from
    /// the initial cache fill is dropped.
    pub async fn add_namespace_informers(self: &Arc<Self>, names: &[String]) {
        for name in names {
            self.active.write().await.insert(name.clone());

            let mut watched = self.watched.write().await;
            if !watched.insert(name.clone()) {
                continue;
            }
            drop(watched);

            self.spawn_chaos_watcher(name.clone());
            tracing::info!(namespace = %name, "watching chaos resources");
        }
    }

    /// Stop processing events from the given namespaces.
    ///
    /// The underlying watcher keeps running (it cannot be stopped
    /// gracefully mid-life); handlers drop events from inactive
    /// namespaces. Idempotent.
    pub async fn remove_namespace_informers(&self, names: &[String]) {
        let mut active = self.active.write().await;
        for name in names {
            if active.remove(name) {
                tracing::info!(namespace = %name, "namespace informers deactivated");
            }
        }
    }

    fn spawn_chaos_watcher(self: &Arc<Self>, namespace: String) {
        let api: Api<FaultExperiment> = Api::namespaced(self.client.clone(), &namespace);
        let config = watcher::Config::default().labels(&self.selector());
        let controller = Arc::clone(self);
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let mut stream = std::pin::pin!(watcher(api, config));
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => return,
                    event = stream.try_next() => event,
                };
                match event {
                    Ok(Some(watcher::Event::Apply(obj) | watcher::Event::InitApply(obj))) => {
                        if !controller.is_namespace_active(&namespace).await {
                            continue;
                        }
                        if let Err(e) = controller.handle_chaos_applied(&namespace, &obj).await {
                            tracing::warn!(
                                namespace = %namespace,
                                name = %obj.name_any(),
                                error = %e,
                                "chaos apply handler failed"
                            );
                        }
                    }
                    Ok(Some(watcher::Event::Delete(obj))) => {
                        if !controller.is_namespace_active(&namespace).await {
                            continue;
                        }
                        if let Err(e) = controller.handle_chaos_deleted(&namespace, &obj).await {
                            tracing::warn!(
                                namespace = %namespace,
                                name = %obj.name_any(),
                                error = %e,
                                "chaos delete handler failed"
                            );
                        }
                    }
                    Ok(Some(watcher::Event::Init | watcher::Event::InitDone)) => {}
                    Ok(None) => {
                        tracing::warn!(namespace = %namespace, "chaos watcher stream ended");
                        return;
                    }
                    Err(e) => {
                        tracing::warn!(namespace = %namespace, error = %e, "chaos watch error");
                        tokio::time::sleep(WATCH_ERROR_BACKOFF).await;
                    }
                }
            }
        });
    }

    fn spawn_job_watcher(self: &Arc<Self>) {
        let api: Api<Job> =
            Api::namespaced(self.client.clone(), &self.deps.config.k8s.namespace);
        let config = watcher::Config::default().labels(&self.selector());
        let controller = Arc::clone(self);
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let mut stream = std::pin::pin!(watcher(api, config));
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => return,
                    event = stream.try_next() => event,
                };
                match event {
                    Ok(Some(watcher::Event::Apply(job) | watcher::Event::InitApply(job))) => {
                        if let Err(e) = controller.handle_job_applied(&job).await {
                            tracing::warn!(
                                job = %job.name_any(),
                                error = %e,
                                "job handler failed"
                            );
                        }
                    }
                    Ok(Some(watcher::Event::Delete(_))) => {}
                    Ok(Some(watcher::Event::Init | watcher::Event::InitDone)) => {}
                    Ok(None) => {
                        tracing::warn!("job watcher stream ended");
                        return;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "job watch error");
                        tokio::time::sleep(WATCH_ERROR_BACKOFF).await;
                    }
                }
            }
        });
    }

    fn spawn_pod_watcher(self: &Arc<Self>) {
        let api: Api<Pod> =
            Api::namespaced(self.client.clone(), &self.deps.config.k8s.namespace);
        let config = watcher::Config::default().labels(&self.selector());
        let controller = Arc::clone(self);
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let mut stream = std::pin::pin!(watcher(api, config));
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => return,
                    event = stream.try_next() => event,
                };
                match event {
                    Ok(Some(watcher::Event::Apply(pod) | watcher::Event::InitApply(pod))) => {
                        if let Err(e) = controller.handle_pod_applied(&pod).await {
                            tracing::warn!(
                                pod = %pod.name_any(),
                                error = %e,
                                "pod handler failed"
                            );
                        }
                    }
                    Ok(Some(_)) => {}
                    Ok(None) => {
                        tracing::warn!("pod watcher stream ended");
                        return;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "pod watch error");
                        tokio::time::sleep(WATCH_ERROR_BACKOFF).await;
                    }
                }
            }
        });
    }

    /// Resolve the task a cluster object belongs to from its labels.
    pub(super) async fn task_for_labels(
        &self,
        labels: &std::collections::BTreeMap<String, String>,
    ) -> Result<Option<Task>> {
        let Some(task_id) = labels
            .get(label_keys::TASK_ID)
            .and_then(|v| Uuid::parse_str(v).ok())
        else {
            return Ok(None);
        };
        task_db::get_task(&self.deps.pool, task_id).await
    }
}

/// Work-queue handler that upgrades a weak controller reference.
struct WeakHandler {
    controller: std::sync::Weak<ClusterController>,
}

#[async_trait::async_trait]
impl super::workqueue::WorkHandler for WeakHandler {
    async fn handle(
        &self,
        item: super::workqueue::WorkItem,
    ) -> Result<Option<(super::workqueue::WorkItem, Duration)>> {
        match self.controller.upgrade() {
            Some(controller) => controller.handle_work_item(item).await,
            None => Ok(None),
        }
    }
}
