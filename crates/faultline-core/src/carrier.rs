//! Propagation carriers.
//!
//! Carriers travel with a task through the queue and, serialised into
//! cluster-resource annotations, let follow-up tasks created by the
//! controller re-attach to the same trace and group. Cancellation is
//! hierarchical (group, then trace, then task): the carriers hold the
//! identifiers each layer hangs its context on.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use faultline_db::models::Task;

/// Trace-level propagation context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceCarrier {
    pub trace_id: String,
    pub group_id: String,
    #[serde(default)]
    pub baggage: HashMap<String, String>,
}

/// Task-level propagation context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCarrier {
    pub task_id: String,
    #[serde(default)]
    pub parent_task_id: String,
    #[serde(default)]
    pub baggage: HashMap<String, String>,
}

impl TraceCarrier {
    pub fn for_task(task: &Task) -> Self {
        Self {
            trace_id: task.trace_id.to_string(),
            group_id: task.group_id.to_string(),
            baggage: HashMap::new(),
        }
    }

    /// Deserialize from a task's stored carrier, falling back to a fresh
    /// carrier built from the task's own identifiers.
    pub fn extract_or_create(task: &Task) -> Self {
        serde_json::from_value::<Self>(task.trace_carrier.clone())
            .ok()
            .filter(|c| !c.trace_id.is_empty())
            .unwrap_or_else(|| Self::for_task(task))
    }

    pub fn trace_uuid(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.trace_id).ok()
    }
}

impl TaskCarrier {
    pub fn for_task(task: &Task) -> Self {
        Self {
            task_id: task.id.to_string(),
            parent_task_id: task
                .parent_task_id
                .map(|id| id.to_string())
                .unwrap_or_default(),
            baggage: HashMap::new(),
        }
    }

    pub fn extract_or_create(task: &Task) -> Self {
        serde_json::from_value::<Self>(task.task_carrier.clone())
            .ok()
            .filter(|c| !c.task_id.is_empty())
            .unwrap_or_else(|| Self::for_task(task))
    }

    pub fn task_uuid(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.task_id).ok()
    }
}

/// Annotation keys under which carriers ride on cluster resources.
pub const TRACE_CARRIER_ANNOTATION: &str = "faultline.dev/trace-carrier";
pub const TASK_CARRIER_ANNOTATION: &str = "faultline.dev/task-carrier";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn carrier_json_roundtrip() {
        let carrier = TraceCarrier {
            trace_id: Uuid::now_v7().to_string(),
            group_id: Uuid::now_v7().to_string(),
            baggage: HashMap::from([("tenant".into(), "bench".into())]),
        };
        let json = serde_json::to_string(&carrier).unwrap();
        let back: TraceCarrier = serde_json::from_str(&json).unwrap();
        assert_eq!(back, carrier);
    }

    #[test]
    fn extract_falls_back_to_task_ids() {
        let mut task = crate::test_support::sample_task();
        task.trace_carrier = serde_json::json!({});
        let carrier = TraceCarrier::extract_or_create(&task);
        assert_eq!(carrier.trace_id, task.trace_id.to_string());
        assert_eq!(carrier.group_id, task.group_id.to_string());
    }
}
