//! The `trace` command: one trace, its tasks, and recent events.

use anyhow::{Context, Result};
use uuid::Uuid;

use faultline_db::pool;
use faultline_db::queries::{stream_events, tasks, traces};

use crate::config::ResolvedConfig;

pub async fn run(resolved: ResolvedConfig, trace_id: Uuid) -> Result<()> {
    let db = pool::create_pool(&resolved.db).await?;

    let trace = traces::get_trace(&db, trace_id)
        .await?
        .with_context(|| format!("trace {trace_id} not found"))?;

    println!("trace {} ({})", trace.id, trace.kind);
    println!(
        "  state={} last_event={}",
        trace.state,
        trace.last_event.as_deref().unwrap_or("-")
    );
    println!("  started={} ended={}", trace.started_at, opt(trace.ended_at));

    println!("\ntasks:");
    for task in tasks::list_tasks_for_trace(&db, trace_id).await? {
        println!(
            "  L{} {} {} state={} restarts={} event={}",
            task.level,
            task.id,
            task.kind,
            task.state,
            task.restart_num,
            if task.last_event.is_empty() {
                "-"
            } else {
                &task.last_event
            },
        );
    }

    println!("\nrecent events:");
    for event in stream_events::read_after(&db, trace_id, 0, 50).await? {
        println!(
            "  #{} {} {} {}",
            event.id, event.recorded_at, event.event, event.task_id
        );
    }

    Ok(())
}

fn opt(value: Option<chrono::DateTime<chrono::Utc>>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".into())
}
