//! The cluster API seam.
//!
//! Executors describe the resources they need in plain request structs
//! and submit them through [`ClusterApi`]; the kube-backed
//! implementation lives in [`super::kube_impl`], tests use in-memory
//! fakes.

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;

use faultline_db::models::Task;

use crate::carrier::{
    TASK_CARRIER_ANNOTATION, TRACE_CARRIER_ANNOTATION, TaskCarrier, TraceCarrier,
};

/// Label keys stamped on every cluster object this application owns.
pub mod label_keys {
    /// Filter label restricting informers to our objects.
    pub const APP_ID: &str = "app_id";
    pub const TASK_ID: &str = "task_id";
    pub const TASK_TYPE: &str = "task_type";
    pub const TRACE_ID: &str = "trace_id";
    pub const GROUP_ID: &str = "group_id";
    pub const PROJECT_ID: &str = "project_id";
    pub const USER_ID: &str = "user_id";
    /// Batch name of the injection row a chaos resource belongs to.
    pub const INJECTION_NAME: &str = "injection_name";
    /// Datapack a job builds or consumes.
    pub const DATAPACK: &str = "datapack";
    /// Execution row id carried by algorithm jobs.
    pub const EXECUTION_ID: &str = "execution_id";
}

/// Identifier labels for a task's cluster resources.
pub fn identity_labels(task: &Task, app_id: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (label_keys::APP_ID.to_owned(), app_id.to_owned()),
        (label_keys::TASK_ID.to_owned(), task.id.to_string()),
        (label_keys::TASK_TYPE.to_owned(), task.kind.to_string()),
        (label_keys::TRACE_ID.to_owned(), task.trace_id.to_string()),
        (label_keys::GROUP_ID.to_owned(), task.group_id.to_string()),
        (label_keys::PROJECT_ID.to_owned(), task.project_id.clone()),
        (label_keys::USER_ID.to_owned(), task.user_id.clone()),
    ])
}

/// Carrier annotations for a task's cluster resources, so follow-up
/// tasks created by the controller re-attach to the same trace.
pub fn carrier_annotations(task: &Task) -> BTreeMap<String, String> {
    let trace_carrier = TraceCarrier::extract_or_create(task);
    let task_carrier = TaskCarrier::extract_or_create(task);
    BTreeMap::from([
        (
            TRACE_CARRIER_ANNOTATION.to_owned(),
            serde_json::to_string(&trace_carrier).unwrap_or_default(),
        ),
        (
            TASK_CARRIER_ANNOTATION.to_owned(),
            serde_json::to_string(&task_carrier).unwrap_or_default(),
        ),
    ])
}

/// One chaos resource to create.
#[derive(Debug, Clone, PartialEq)]
pub struct ChaosResourceRequest {
    /// Resource name in the cluster.
    pub name: String,
    /// Fault action (maps to the experiment's spec action).
    pub action: String,
    /// Minutes the fault stays active.
    pub duration_minutes: i64,
    /// Engine-specific spec, passed through opaquely.
    pub engine_spec: serde_json::Value,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

/// One batch job to submit.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRequest {
    pub name: String,
    pub namespace: String,
    pub image: String,
    pub command: Vec<String>,
    pub env: Vec<(String, String)>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    /// Mount path of the shared data volume inside the container.
    pub volume_mount_path: String,
    /// When set, an init container creates this directory before the
    /// main container starts.
    pub create_output_dir: Option<String>,
}

/// Condition types reported by chaos experiments.
pub mod conditions {
    pub const SELECTED: &str = "Selected";
    pub const ALL_INJECTED: &str = "AllInjected";
    pub const ALL_RECOVERED: &str = "AllRecovered";
}

/// Observed status of a chaos resource.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChaosStatus {
    /// `Run` while injecting, `Stop` once the engine winds down.
    pub desired_phase: Option<String>,
    /// Condition type -> truth value.
    pub conditions: BTreeMap<String, bool>,
}

impl ChaosStatus {
    pub fn condition(&self, name: &str) -> Option<bool> {
        self.conditions.get(name).copied()
    }

    pub fn selected(&self) -> Option<bool> {
        self.condition(conditions::SELECTED)
    }

    pub fn all_injected(&self) -> Option<bool> {
        self.condition(conditions::ALL_INJECTED)
    }

    pub fn all_recovered(&self) -> Option<bool> {
        self.condition(conditions::ALL_RECOVERED)
    }

    /// The engine is stopping without having selected or injected its
    /// targets.
    pub fn stopped_without_injecting(&self) -> bool {
        self.desired_phase.as_deref() == Some("Stop")
            && (self.selected() == Some(false) || self.all_injected() == Some(false))
    }
}

/// Cluster operations the engine depends on.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Create the chaos resources of one injection batch in a
    /// namespace.
    async fn create_chaos_resources(
        &self,
        namespace: &str,
        batch: &[ChaosResourceRequest],
    ) -> Result<()>;

    /// Submit a batch job.
    async fn submit_job(&self, job: &JobRequest) -> Result<()>;

    /// Fetch a chaos resource's observed status; `None` when the
    /// resource is gone.
    async fn get_chaos_status(&self, namespace: &str, name: &str) -> Result<Option<ChaosStatus>>;

    /// Best-effort delete of a chaos resource: clear finalizers first,
    /// bounded overall at 10 s.
    async fn delete_chaos_resource(&self, namespace: &str, name: &str) -> Result<()>;

    /// Best-effort delete of a job and its pods.
    async fn delete_job(&self, namespace: &str, name: &str) -> Result<()>;
}

// Compile-time assertion: ClusterApi must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn ClusterApi) {}
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_task;

    #[test]
    fn identity_labels_cover_all_ids() {
        let task = sample_task();
        let labels = identity_labels(&task, "faultline");
        assert_eq!(labels[label_keys::APP_ID], "faultline");
        assert_eq!(labels[label_keys::TASK_ID], task.id.to_string());
        assert_eq!(labels[label_keys::TASK_TYPE], task.kind.to_string());
        assert_eq!(labels[label_keys::TRACE_ID], task.trace_id.to_string());
    }

    #[test]
    fn carrier_annotations_roundtrip() {
        let task = sample_task();
        let annotations = carrier_annotations(&task);
        let carrier: TraceCarrier =
            serde_json::from_str(&annotations[TRACE_CARRIER_ANNOTATION]).unwrap();
        assert_eq!(carrier.trace_id, task.trace_id.to_string());
    }

    #[test]
    fn stopped_without_injecting_rules() {
        let mut status = ChaosStatus {
            desired_phase: Some("Stop".into()),
            conditions: BTreeMap::from([(conditions::SELECTED.to_owned(), false)]),
        };
        assert!(status.stopped_without_injecting());

        status.conditions =
            BTreeMap::from([(conditions::ALL_INJECTED.to_owned(), false)]);
        assert!(status.stopped_without_injecting());

        status.conditions = BTreeMap::from([
            (conditions::SELECTED.to_owned(), true),
            (conditions::ALL_INJECTED.to_owned(), true),
        ]);
        assert!(!status.stopped_without_injecting());

        status.desired_phase = Some("Run".into());
        status.conditions =
            BTreeMap::from([(conditions::SELECTED.to_owned(), false)]);
        assert!(!status.stopped_without_injecting());
    }
}
