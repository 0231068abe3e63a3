//! Builders shared by unit tests.

use chrono::Utc;
use uuid::Uuid;

use faultline_db::models::{Task, TaskKind, TaskState};

/// A pending task with fresh identifiers and empty carriers.
pub fn sample_task() -> Task {
    Task {
        id: Uuid::now_v7(),
        kind: TaskKind::RestartPedestal,
        state: TaskState::Pending,
        payload: serde_json::json!({}),
        immediate: false,
        execute_at: Utc::now(),
        cron_expr: None,
        max_attempts: 2,
        backoff_secs: 1,
        restart_num: 0,
        parent_task_id: None,
        trace_id: Uuid::now_v7(),
        group_id: Uuid::now_v7(),
        project_id: "proj".into(),
        user_id: "user".into(),
        sequence: 0,
        level: 1,
        trace_carrier: serde_json::json!({}),
        task_carrier: serde_json::json!({}),
        error_log: serde_json::json!([]),
        last_event: String::new(),
        created_at: Utc::now(),
        started_at: None,
        completed_at: None,
    }
}

/// Same, with an explicit kind and level.
pub fn task_at(kind: TaskKind, level: i32, trace_id: Uuid) -> Task {
    let mut task = sample_task();
    task.kind = kind;
    task.level = level;
    task.trace_id = trace_id;
    task
}
