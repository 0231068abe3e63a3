//! Stream-event publisher.
//!
//! Events land in the per-trace stream log with the publishing call
//! site attached. Publishing is never fatal: a failed append is logged
//! and swallowed so observability problems cannot fail a pipeline step.

use std::panic::Location;

use sqlx::PgPool;

use faultline_db::models::Task;
use faultline_db::queries::stream_events::{self, NewStreamEvent};

/// Well-known event names.
pub mod names {
    pub const TASK_STATE_UPDATE: &str = "task_state_update";
    pub const TASK_RETRY_STATUS: &str = "task_retry_status";
    pub const TASK_CANCELLED: &str = "task_cancelled";
    pub const TASK_RESCHEDULED: &str = "task_rescheduled";
    pub const TASK_DEAD_LETTERED: &str = "task_dead_lettered";

    pub const IMAGE_BUILD_SUCCESS: &str = "image_build_success";
    pub const RESTART_PEDESTAL_COMPLETED: &str = "restart_pedestal_completed";
    pub const FAULT_INJECTION_STARTED: &str = "fault_injection_started";
    pub const DATAPACK_BUILD_SUBMITTED: &str = "datapack_build_submitted";
    pub const ALGO_RUN_SUBMITTED: &str = "algo_run_submitted";
    pub const FAULT_INJECTION_SUCCEEDED: &str = "fault_injection_succeeded";
    pub const FAULT_INJECTION_FAILED: &str = "fault_injection_failed";
    pub const DATAPACK_BUILD_SUCCEEDED: &str = "datapack_build_succeeded";
    pub const DATAPACK_BUILD_FAILED: &str = "datapack_build_failed";
    pub const ALGO_RUN_SUCCEEDED: &str = "algo_run_succeeded";
    pub const ALGO_RUN_FAILED: &str = "algo_run_failed";

    pub const DATAPACK_NO_DETECTOR_DATA: &str = "datapack_no_detector_data";
    pub const DATAPACK_NO_ANOMALY: &str = "datapack_no_anomaly";
    pub const DATAPACK_RESULT_COLLECTION: &str = "datapack_result_collection";
    pub const ALGO_NO_RESULT_DATA: &str = "algo_no_result_data";
    pub const ALGO_RESULT_COLLECTION: &str = "algo_result_collection";
}

/// Publishes structured events to the stream log.
#[derive(Clone)]
pub struct EventPublisher {
    pool: PgPool,
}

impl EventPublisher {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Append an event for a task to its trace's stream.
    ///
    /// The caller's file and line are captured via `#[track_caller]`;
    /// the event name doubles as the function field. Errors are logged
    /// at warn and dropped.
    #[track_caller]
    pub fn publish(
        &self,
        task: &Task,
        event: &'static str,
        payload: serde_json::Value,
    ) -> impl Future<Output = ()> + Send + use<> {
        let location = Location::caller();
        let file = location.file().to_owned();
        let line = location.line() as i32;
        let func = event;
        let pool = self.pool.clone();
        let trace_id = task.trace_id;
        let task_id = task.id;
        let task_kind = task.kind.to_string();

        async move {
            let record = NewStreamEvent {
                trace_id,
                task_id,
                task_kind: &task_kind,
                event,
                payload,
                file: &file,
                line,
                func,
            };
            if let Err(e) = stream_events::append(&pool, &record).await {
                tracing::warn!(
                    task_id = %task_id,
                    trace_id = %trace_id,
                    event = event,
                    error = %e,
                    "failed to publish stream event (best-effort)"
                );
            }
        }
    }
}
