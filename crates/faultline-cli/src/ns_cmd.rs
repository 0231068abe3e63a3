//! The `namespaces` command: inspect and reconcile the lock pool.

use anyhow::Result;
use chrono::{TimeZone, Utc};

use faultline_core::monitor::NamespaceMonitor;
use faultline_db::pool;

use crate::config::ResolvedConfig;

pub async fn run(resolved: ResolvedConfig, refresh: bool) -> Result<()> {
    let db = pool::create_pool(&resolved.db).await?;
    let monitor = NamespaceMonitor::new(
        db,
        resolved.engine.k8s.chaos_namespaces.iter().cloned(),
    );

    if refresh {
        let diff = monitor.refresh_namespaces().await?;
        if diff.is_empty() {
            println!("pool already in sync");
        } else {
            println!(
                "reconciled: +{:?} recovered={:?} disabled={:?} deleted={:?}",
                diff.added, diff.recovered, diff.disabled, diff.deleted
            );
        }
    }

    for ns in monitor.inspect_lock().await? {
        let status = ns
            .status_enum()
            .map(|s| s.to_string())
            .unwrap_or_else(|_| format!("?{}", ns.status));
        let holder = if ns.trace_id.is_empty() {
            "free".to_owned()
        } else {
            let until = Utc
                .timestamp_opt(ns.lease_until, 0)
                .single()
                .map(|t| t.to_string())
                .unwrap_or_else(|| ns.lease_until.to_string());
            format!("held by {} until {}", ns.trace_id, until)
        };
        println!("{:<16} {:<8} {}", ns.name, status, holder);
    }

    Ok(())
}
