//! Shared fixtures for the engine integration tests: an in-memory
//! cluster, scriptable build/install primitives, and context builders.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use faultline_core::cluster::api::{
    ChaosResourceRequest, ChaosStatus, ClusterApi, JobRequest,
};
use faultline_core::config::EngineConfig;
use faultline_core::events::EventPublisher;
use faultline_core::executor::payloads::{BuildOptions, PedestalRef};
use faultline_core::executor::{BuildPrimitive, ExecContext, PedestalInstaller};
use faultline_core::monitor::NamespaceMonitor;
use faultline_core::queue::QueueStore;
use faultline_core::ratelimit::RateLimiter;
use faultline_db::models::{Task, TaskKind, TaskState, TraceKind};
use faultline_db::queries::traces;

/// Records what executors submit; statuses are scriptable.
#[derive(Default)]
pub struct RecordingCluster {
    pub chaos: Mutex<Vec<(String, Vec<ChaosResourceRequest>)>>,
    pub jobs: Mutex<Vec<JobRequest>>,
    pub statuses: Mutex<HashMap<(String, String), ChaosStatus>>,
    pub deleted: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl ClusterApi for RecordingCluster {
    async fn create_chaos_resources(
        &self,
        namespace: &str,
        batch: &[ChaosResourceRequest],
    ) -> Result<()> {
        self.chaos
            .lock()
            .await
            .push((namespace.to_owned(), batch.to_vec()));
        Ok(())
    }

    async fn submit_job(&self, job: &JobRequest) -> Result<()> {
        self.jobs.lock().await.push(job.clone());
        Ok(())
    }

    async fn get_chaos_status(&self, namespace: &str, name: &str) -> Result<Option<ChaosStatus>> {
        Ok(self
            .statuses
            .lock()
            .await
            .get(&(namespace.to_owned(), name.to_owned()))
            .cloned())
    }

    async fn delete_chaos_resource(&self, namespace: &str, name: &str) -> Result<()> {
        self.deleted
            .lock()
            .await
            .push((namespace.to_owned(), name.to_owned()));
        Ok(())
    }

    async fn delete_job(&self, namespace: &str, name: &str) -> Result<()> {
        self.deleted
            .lock()
            .await
            .push((namespace.to_owned(), name.to_owned()));
        Ok(())
    }
}

/// Fails the first `failures` builds, then succeeds.
pub struct ScriptedBuild {
    failures: AtomicUsize,
    pub calls: AtomicUsize,
}

impl ScriptedBuild {
    pub fn failing(failures: usize) -> Self {
        Self {
            failures: AtomicUsize::new(failures),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl BuildPrimitive for ScriptedBuild {
    async fn build_and_push(&self, _: &str, _: &Path, _: &BuildOptions) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            bail!("scripted build failure ({remaining} left)");
        }
        Ok(())
    }
}

/// Records install calls; always succeeds.
#[derive(Default)]
pub struct RecordingInstaller {
    pub installs: Mutex<Vec<(String, u32, String)>>,
}

#[async_trait]
impl PedestalInstaller for RecordingInstaller {
    async fn install(&self, namespace: &str, ns_index: u32, pedestal: &PedestalRef) -> Result<()> {
        self.installs
            .lock()
            .await
            .push((namespace.to_owned(), ns_index, pedestal.name.clone()));
        Ok(())
    }
}

/// Everything an executor test needs.
pub struct TestEngine {
    pub ctx: ExecContext,
    pub queue: QueueStore,
    pub monitor: Arc<NamespaceMonitor>,
    pub limiter: Arc<RateLimiter>,
    pub cluster: Arc<RecordingCluster>,
    pub build: Arc<ScriptedBuild>,
    pub installer: Arc<RecordingInstaller>,
    pub config: Arc<EngineConfig>,
}

/// Build a full engine context over a test database.
///
/// `namespaces` seeds the monitor's configured set; `build_failures`
/// scripts the build primitive.
pub async fn make_engine(pool: &PgPool, namespaces: &[&str], build_failures: usize) -> TestEngine {
    let mut config = EngineConfig::default();
    config.k8s.chaos_namespaces = namespaces.iter().map(|s| s.to_string()).collect();
    // Short token wait so contention tests do not crawl.
    config.rate_limiting.token_wait_timeout = 2;
    let config = Arc::new(config);

    let queue = QueueStore::new(pool.clone());
    let monitor = Arc::new(NamespaceMonitor::new(
        pool.clone(),
        config.k8s.chaos_namespaces.iter().cloned(),
    ));
    monitor.refresh_namespaces().await.expect("seed namespaces");

    let limiter = Arc::new(RateLimiter::new(pool.clone(), &config.rate_limiting));
    let cluster = Arc::new(RecordingCluster::default());
    let build = Arc::new(ScriptedBuild::failing(build_failures));
    let installer = Arc::new(RecordingInstaller::default());

    let ctx = ExecContext {
        pool: pool.clone(),
        queue: queue.clone(),
        monitor: Arc::clone(&monitor),
        limiter: Arc::clone(&limiter),
        publisher: EventPublisher::new(pool.clone()),
        cluster: Arc::clone(&cluster) as Arc<dyn ClusterApi>,
        builder: Arc::clone(&build) as Arc<dyn BuildPrimitive>,
        installer: Arc::clone(&installer) as Arc<dyn PedestalInstaller>,
        config: Arc::clone(&config),
        cancel: CancellationToken::new(),
    };

    TestEngine {
        ctx,
        queue,
        monitor,
        limiter,
        cluster,
        build,
        installer,
        config,
    }
}

/// Insert a trace row and return a task of the given kind attached to
/// it.
pub async fn make_task_with_trace(
    pool: &PgPool,
    trace_kind: TraceKind,
    task_kind: TaskKind,
    level: i32,
    payload: serde_json::Value,
) -> Task {
    let trace_id = Uuid::now_v7();
    let group_id = Uuid::now_v7();
    traces::insert_trace(pool, trace_id, trace_kind, group_id, "", "")
        .await
        .expect("insert trace");

    Task {
        id: Uuid::now_v7(),
        kind: task_kind,
        state: TaskState::Pending,
        payload,
        immediate: true,
        execute_at: Utc::now(),
        cron_expr: None,
        max_attempts: 2,
        backoff_secs: 0,
        restart_num: 0,
        parent_task_id: None,
        trace_id,
        group_id,
        project_id: String::new(),
        user_id: String::new(),
        sequence: 0,
        level,
        trace_carrier: serde_json::json!({}),
        task_carrier: serde_json::json!({}),
        error_log: serde_json::json!([]),
        last_event: String::new(),
        created_at: Utc::now(),
        started_at: None,
        completed_at: None,
    }
}

/// Payload fixture for a restart task.
pub fn restart_payload(interval: i64, fault_duration: i64) -> serde_json::Value {
    serde_json::json!({
        "pedestal": {
            "id": "ped-1",
            "name": "trainticket",
            "ns_pattern": "^ts[0-9]+$",
            "chart": "charts/trainticket",
        },
        "interval": interval,
        "fault_duration": fault_duration,
        "inject_payload": {
            "benchmark": {"id": "b1", "name": "tt-bench", "image_ref": "registry.local/tt:1"},
            "pre_duration": 2,
            "nodes": [
                {"fault_type": "pod-kill", "category": "pod", "duration": fault_duration,
                 "spec": {"selector": {"app": "ts-order"}}},
            ],
            "labels": {"suite": "nightly"},
        },
    })
}
