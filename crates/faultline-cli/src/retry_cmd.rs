//! The `retry-dead` command: give a dead-lettered task another run.

use anyhow::{Context, Result, bail};
use uuid::Uuid;

use faultline_core::queue::QueueStore;
use faultline_db::models::{QueueTier, TaskState};
use faultline_db::pool;
use faultline_db::queries::queue;

use crate::config::ResolvedConfig;

pub async fn run(resolved: ResolvedConfig, task_id: Uuid) -> Result<()> {
    let db = pool::create_pool(&resolved.db).await?;
    let store = QueueStore::new(db.clone());

    match queue::index_tier(&db, task_id).await? {
        Some(QueueTier::Dead) => {}
        Some(tier) => bail!("task {task_id} is in the {tier} tier, not dead-lettered"),
        None => bail!("task {task_id} not found"),
    }

    let mut task = queue::list_dead(&db, i64::MAX)
        .await?
        .into_iter()
        .find(|t| t.id == task_id)
        .with_context(|| format!("dead-letter entry for {task_id} vanished"))?;

    store.remove(task_id).await?;

    // Fresh attempt budget; the error log stays for forensics.
    task.state = TaskState::Pending;
    task.restart_num = 0;
    task.immediate = true;
    store.submit_ready(&task).await?;

    println!("task {task_id} re-submitted");
    Ok(())
}
