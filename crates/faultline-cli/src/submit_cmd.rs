//! The `submit` command: create a trace and its entry task.

use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use uuid::Uuid;

use faultline_core::carrier::{TaskCarrier, TraceCarrier};
use faultline_core::queue::QueueStore;
use faultline_db::models::{Task, TaskKind, TaskState, TraceKind};
use faultline_db::pool;
use faultline_db::queries::traces;

use crate::config::ResolvedConfig;

pub async fn run(
    resolved: ResolvedConfig,
    payload_path: &str,
    trace_kind: &str,
    task_kind: &str,
    delay_secs: i64,
    cron: Option<String>,
) -> Result<()> {
    let trace_kind: TraceKind = trace_kind
        .parse()
        .with_context(|| format!("unknown trace kind {trace_kind:?}"))?;
    let task_kind: TaskKind = task_kind
        .parse()
        .with_context(|| format!("unknown task kind {task_kind:?}"))?;

    let raw = std::fs::read_to_string(payload_path)
        .with_context(|| format!("failed to read payload file {payload_path}"))?;
    let payload: serde_json::Value =
        serde_json::from_str(&raw).context("payload file is not valid JSON")?;

    let db = pool::create_pool(&resolved.db).await?;
    let queue = QueueStore::new(db.clone());

    let trace_id = Uuid::now_v7();
    let group_id = Uuid::now_v7();
    let trace = traces::insert_trace(&db, trace_id, trace_kind, group_id, "", "").await?;

    let now = Utc::now();
    let execute_at = now + ChronoDuration::seconds(delay_secs);
    let mut task = Task {
        id: Uuid::now_v7(),
        kind: task_kind,
        state: TaskState::Pending,
        payload,
        immediate: delay_secs <= 0 && cron.is_none(),
        execute_at,
        cron_expr: cron,
        max_attempts: 2,
        backoff_secs: 5,
        restart_num: 0,
        parent_task_id: None,
        trace_id,
        group_id,
        project_id: String::new(),
        user_id: String::new(),
        sequence: 0,
        level: 1,
        trace_carrier: serde_json::Value::Null,
        task_carrier: serde_json::Value::Null,
        error_log: serde_json::json!([]),
        last_event: String::new(),
        created_at: now,
        started_at: None,
        completed_at: None,
    };
    task.trace_carrier = serde_json::to_value(TraceCarrier::for_task(&task))?;
    task.task_carrier = serde_json::to_value(TaskCarrier::for_task(&task))?;

    queue.submit(&task).await?;

    println!("trace {} ({}) submitted", trace.id, trace.kind);
    println!("entry task {} ({}) at {}", task.id, task.kind, execute_at);
    Ok(())
}
