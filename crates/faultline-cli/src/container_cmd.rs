//! The `container` commands: the named-image registry that backs
//! detector resolution and build payloads.

use anyhow::Result;

use faultline_db::pool;
use faultline_db::queries::containers;

use crate::config::ResolvedConfig;

pub async fn register(
    resolved: ResolvedConfig,
    name: &str,
    version: &str,
    image_ref: &str,
    command: Option<String>,
    env_schema: Option<String>,
) -> Result<()> {
    let db = pool::create_pool(&resolved.db).await?;

    let env_schema = match env_schema {
        Some(raw) => serde_json::from_str(&raw)?,
        None => serde_json::json!({}),
    };

    let row = containers::upsert(
        &db,
        name,
        version,
        image_ref,
        command.as_deref().unwrap_or(""),
        env_schema,
    )
    .await?;

    println!("registered {} {} -> {}", row.name, row.version, row.image_ref);
    Ok(())
}

pub async fn list(resolved: ResolvedConfig, name: &str) -> Result<()> {
    let db = pool::create_pool(&resolved.db).await?;

    let versions = containers::list_for_name(&db, name).await?;
    if versions.is_empty() {
        println!("no versions registered for {name}");
        return Ok(());
    }
    for v in versions {
        println!("{:<24} {:<12} {}", v.name, v.version, v.image_ref);
    }
    Ok(())
}
