//! Pool construction, admin helpers, and runtime migrations.

use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Connection, Executor, PgConnection, PgPool};
use tracing::info;

use crate::config::DbConfig;

/// Open a pool sized and tagged per the config.
///
/// Every connection reports the config's `application_name`, so the
/// processes sharing the store stay distinguishable server-side.
pub async fn create_pool(config: &DbConfig) -> Result<PgPool> {
    let options = PgConnectOptions::from_str(&config.database_url)
        .with_context(|| format!("malformed database URL {}", config.database_url))?
        .application_name(&config.application_name);

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect_with(options)
        .await
        .with_context(|| {
            format!(
                "failed to connect to {} as {}",
                config.database_url, config.application_name
            )
        })?;
    Ok(pool)
}

/// Open a single short-lived connection for admin statements.
///
/// `CREATE DATABASE` and friends need exactly one connection; a pool
/// would only add teardown noise around them.
pub async fn admin_connection(url: &str) -> Result<PgConnection> {
    PgConnection::connect(url)
        .await
        .with_context(|| format!("failed to open admin connection to {url}"))
}

/// Apply all pending migrations from a directory.
///
/// The migrator is built at runtime so the crate compiles without a
/// reachable database (the `sqlx::migrate!()` macro would need one);
/// deployments point it at [`default_migrations_path`] or their own
/// copy of the directory.
pub async fn run_migrations(pool: &PgPool, migrations_dir: &Path) -> Result<()> {
    let migrator = sqlx::migrate::Migrator::new(migrations_dir)
        .await
        .with_context(|| {
            format!("failed to load migrations from {}", migrations_dir.display())
        })?;

    let known = migrator.iter().count();
    migrator
        .run(pool)
        .await
        .context("failed to run database migrations")?;

    info!(known = known, "migrations up to date");
    Ok(())
}

/// Create the configured database when it does not exist yet.
///
/// Admin statements run on the server's `postgres` maintenance
/// database; a URL without a database name is rejected rather than
/// guessed at.
pub async fn ensure_database_exists(config: &DbConfig) -> Result<()> {
    let Some(db_name) = config.database_name() else {
        bail!(
            "database URL {} does not name a database to create",
            config.database_url
        );
    };

    // CREATE DATABASE cannot take a bound parameter, so the name goes
    // into the statement text; restrict it to identifier characters
    // first.
    if !db_name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        bail!("database name {db_name:?} contains invalid characters");
    }

    let mut admin = admin_connection(&config.maintenance_url()).await?;

    let present: Option<i32> =
        sqlx::query_scalar("SELECT 1 FROM pg_database WHERE datname = $1")
            .bind(db_name)
            .fetch_optional(&mut admin)
            .await
            .context("failed to query pg_database")?;

    match present {
        Some(_) => info!(db = db_name, "database already exists"),
        None => {
            let stmt = format!("CREATE DATABASE {db_name}");
            admin
                .execute(stmt.as_str())
                .await
                .with_context(|| format!("failed to create database {db_name}"))?;
            info!(db = db_name, "database created");
        }
    }

    admin.close().await.ok();
    Ok(())
}

/// Migrations directory shipped inside this crate's source tree.
///
/// Resolved from `CARGO_MANIFEST_DIR` at compile time, so it holds for
/// checkouts and workspace builds; installed binaries that leave the
/// tree behind must carry the directory themselves.
pub fn default_migrations_path() -> &'static Path {
    Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/migrations"))
}
