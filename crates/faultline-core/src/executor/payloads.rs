//! Typed task payloads.
//!
//! Payloads travel through the queue as opaque JSON and are interpreted
//! by the executor of the task's kind. Deserialization failures are
//! parse errors: surfaced immediately, never retried.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use faultline_db::models::Task;

use crate::error::ExecError;

/// Deserialize a task's payload into the executor's typed form.
pub fn parse_payload<T: DeserializeOwned>(task: &Task) -> Result<T, ExecError> {
    serde_json::from_value(task.payload.clone()).map_err(|e| {
        ExecError::Parse(format!("task {} ({}): {e}", task.id, task.kind))
    })
}

// -----------------------------------------------------------------------
// Shared references
// -----------------------------------------------------------------------

/// A deployable target-system stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PedestalRef {
    pub id: String,
    pub name: String,
    /// Regex selecting the environment namespaces this pedestal may
    /// occupy.
    pub ns_pattern: String,
    /// Chart reference handed to the installer.
    pub chart: String,
    /// Values overrides, templated per namespace index.
    #[serde(default)]
    pub values: serde_json::Value,
}

/// A benchmark container that builds datapacks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkRef {
    pub id: String,
    pub name: String,
    pub image_ref: String,
}

/// An RCA or detector algorithm container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmRef {
    pub name: String,
    pub version_id: String,
    pub image_ref: String,
    #[serde(default)]
    pub command: Option<String>,
}

/// A time-bounded telemetry snapshot around one injected fault.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatapackSpec {
    pub name: String,
    /// Unix seconds: when the fault window opened.
    pub start_time: i64,
    /// Unix seconds: when the fault window closed.
    pub end_time: i64,
    /// Minutes of normal traffic captured before the window.
    #[serde(default)]
    pub pre_duration: i64,
}

/// One fault to inject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultNode {
    pub fault_type: String,
    #[serde(default)]
    pub category: String,
    /// Minutes the fault stays active.
    pub duration: i64,
    /// Engine-specific fault spec, passed through opaquely.
    #[serde(default)]
    pub spec: serde_json::Value,
}

// -----------------------------------------------------------------------
// Per-kind payloads
// -----------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildOptions {
    #[serde(default)]
    pub context_dir: String,
    #[serde(default)]
    pub dockerfile_path: String,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub build_args: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildContainerPayload {
    pub image_ref: String,
    pub source_path: String,
    #[serde(default)]
    pub build_options: BuildOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestartPedestalPayload {
    pub pedestal: PedestalRef,
    /// Minutes the namespace is leased for.
    pub interval: i64,
    /// Minutes of fault activity inside the lease.
    pub fault_duration: i64,
    /// Payload forwarded into the follow-up fault-injection task.
    pub inject_payload: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultInjectionPayload {
    pub benchmark: BenchmarkRef,
    #[serde(default)]
    pub pre_duration: i64,
    pub nodes: Vec<FaultNode>,
    pub namespace: String,
    pub pedestal: PedestalRef,
    pub pedestal_id: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub dataset_version_id: String,
    /// Forwarded down the pipeline to the detector's result collection.
    #[serde(default)]
    pub rca_algorithms: Vec<AlgorithmRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildDatapackPayload {
    pub benchmark: BenchmarkRef,
    pub datapack: DatapackSpec,
    #[serde(default)]
    pub dataset_version_id: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    pub namespace: String,
    #[serde(default)]
    pub rca_algorithms: Vec<AlgorithmRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunAlgorithmPayload {
    pub algorithm: AlgorithmRef,
    pub datapack: DatapackSpec,
    #[serde(default)]
    pub dataset_version_id: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// RCA algorithms the group configured; the detector's result
    /// collection fans these out when anomalies were found.
    #[serde(default)]
    pub rca_algorithms: Vec<AlgorithmRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectResultPayload {
    pub algorithm: AlgorithmRef,
    pub datapack: DatapackSpec,
    pub execution_id: Uuid,
    #[serde(default)]
    pub dataset_version_id: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub rca_algorithms: Vec<AlgorithmRef>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_task;

    #[test]
    fn parse_valid_restart_payload() {
        let mut task = sample_task();
        task.payload = serde_json::json!({
            "pedestal": {
                "id": "ped-1",
                "name": "trainticket",
                "ns_pattern": "^ts[0-9]+$",
                "chart": "charts/trainticket",
            },
            "interval": 10,
            "fault_duration": 5,
            "inject_payload": {"nodes": []},
        });

        let payload: RestartPedestalPayload = parse_payload(&task).expect("parses");
        assert_eq!(payload.interval, 10);
        assert_eq!(payload.pedestal.ns_pattern, "^ts[0-9]+$");
    }

    #[test]
    fn parse_rejects_malformed_payload() {
        let mut task = sample_task();
        task.payload = serde_json::json!({"interval": "ten"});
        let err = parse_payload::<RestartPedestalPayload>(&task).unwrap_err();
        assert!(matches!(err, ExecError::Parse(_)));
    }

    #[test]
    fn build_options_default_when_absent() {
        let mut task = sample_task();
        task.payload = serde_json::json!({
            "image_ref": "registry.local/bench:1",
            "source_path": "/tmp/src",
        });
        let payload: BuildContainerPayload = parse_payload(&task).expect("parses");
        assert_eq!(payload.build_options, BuildOptions::default());
    }
}
