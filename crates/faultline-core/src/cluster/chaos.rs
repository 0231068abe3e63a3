//! Minimal typed surface of the chaos experiment CRD.
//!
//! Only the fields the controller inspects are typed: the experiment's
//! desired phase and its conditions. The fault spec itself passes
//! through opaquely; mapping it is the chaos engine's concern.

use std::collections::BTreeMap;

use kube::CustomResource;
use serde::{Deserialize, Serialize};

use super::api::ChaosStatus;

/// Spec of a chaos experiment. `action` and `duration` are the fields
/// we set; everything else flattens through untouched.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize)]
#[kube(
    group = "chaos.faultline.dev",
    version = "v1alpha1",
    kind = "FaultExperiment",
    namespaced,
    status = "FaultExperimentStatus",
    schema = "disabled"
)]
pub struct FaultExperimentSpec {
    pub action: String,
    /// Engine duration string, e.g. `"5m"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    /// Engine-specific fault configuration.
    #[serde(flatten)]
    pub engine: BTreeMap<String, serde_json::Value>,
}

/// Status reported by the chaos engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FaultExperimentStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experiment: Option<ExperimentRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ExperimentCondition>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired_phase: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentCondition {
    #[serde(rename = "type")]
    pub condition_type: String,
    /// `"True"` / `"False"` / `"Unknown"`, per Kubernetes convention.
    pub status: String,
}

impl FaultExperimentStatus {
    /// Collapse into the engine-neutral [`ChaosStatus`].
    pub fn observed(&self) -> ChaosStatus {
        let conditions = self
            .conditions
            .iter()
            .filter_map(|c| match c.status.as_str() {
                "True" => Some((c.condition_type.clone(), true)),
                "False" => Some((c.condition_type.clone(), false)),
                _ => None,
            })
            .collect();
        ChaosStatus {
            desired_phase: self
                .experiment
                .as_ref()
                .and_then(|e| e.desired_phase.clone()),
            conditions,
        }
    }
}
