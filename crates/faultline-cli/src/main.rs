mod config;
mod container_cmd;
mod ns_cmd;
mod retry_cmd;
mod serve_cmd;
mod status_cmd;
mod submit_cmd;
mod trace_cmd;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use faultline_db::pool;

#[derive(Parser)]
#[command(name = "faultline", about = "RCA benchmarking control plane")]
struct Cli {
    /// Database URL (overrides FAULTLINE_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = faultline_db::config::DbConfig::DEFAULT_URL)]
        db_url: String,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Initialize the database (create it and run migrations)
    DbInit,
    /// Run the engine: scheduler, consumer, and cluster controller
    Serve {
        /// Skip the cluster controller (no Kubernetes access needed)
        #[arg(long)]
        no_controller: bool,
    },
    /// Submit a pipeline
    Submit {
        /// Path to a JSON file with the task payload
        payload: String,
        /// Pipeline kind: full_pipeline, fault_injection,
        /// datapack_build, or algorithm_run
        #[arg(long, default_value = "full_pipeline")]
        trace_kind: String,
        /// Entry task kind for the pipeline
        #[arg(long, default_value = "restart_pedestal")]
        task_kind: String,
        /// Delay before the first task runs, in seconds
        #[arg(long, default_value_t = 0)]
        delay: i64,
        /// Optional cron expression for recurring submission
        #[arg(long)]
        cron: Option<String>,
    },
    /// Show queue depths, slot usage, and rate-limit occupancy
    Status,
    /// Show a trace with its tasks and recent events
    Trace {
        /// Trace ID to inspect
        trace_id: String,
    },
    /// Cancel a task (queued or running)
    Cancel {
        /// Task ID to cancel
        task_id: String,
    },
    /// Inspect or refresh the namespace lock pool
    Namespaces {
        /// Reconcile the pool against configuration first
        #[arg(long)]
        refresh: bool,
    },
    /// Re-submit a dead-lettered task with a fresh attempt budget
    RetryDead {
        /// Task ID to resurrect
        task_id: String,
    },
    /// Container-version registry
    Container {
        #[command(subcommand)]
        command: ContainerCommands,
    },
}

#[derive(Subcommand)]
pub enum ContainerCommands {
    /// Register (or replace) a named container version
    Register {
        /// Container name (e.g. the detector algorithm name)
        name: String,
        /// Image reference to run
        image_ref: String,
        /// Version tag
        #[arg(long, default_value = "latest")]
        version: String,
        /// Container command override
        #[arg(long)]
        command: Option<String>,
        /// JSON env-var schema
        #[arg(long)]
        env_schema: Option<String>,
    },
    /// List registered versions of a container
    List {
        /// Container name
        name: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { db_url, force } => {
            let path = config::config_path();
            if path.exists() && !force {
                anyhow::bail!(
                    "config file already exists at {} (use --force to overwrite)",
                    path.display()
                );
            }
            let mut file = config::ConfigFile::default();
            file.database.url = db_url;
            config::save_config(&file)?;
            println!("wrote {}", path.display());
            Ok(())
        }
        Commands::DbInit => {
            let resolved = config::resolve(cli.database_url.as_deref())?;
            pool::ensure_database_exists(&resolved.db).await?;
            let db = pool::create_pool(&resolved.db).await?;
            pool::run_migrations(&db, pool::default_migrations_path()).await?;
            println!("database ready at {}", resolved.db.database_url);
            Ok(())
        }
        Commands::Serve { no_controller } => {
            let resolved = config::resolve(cli.database_url.as_deref())?;
            serve_cmd::run(resolved, no_controller).await
        }
        Commands::Submit {
            payload,
            trace_kind,
            task_kind,
            delay,
            cron,
        } => {
            let resolved = config::resolve(cli.database_url.as_deref())?;
            submit_cmd::run(resolved, &payload, &trace_kind, &task_kind, delay, cron).await
        }
        Commands::Status => {
            let resolved = config::resolve(cli.database_url.as_deref())?;
            status_cmd::run(resolved).await
        }
        Commands::Trace { trace_id } => {
            let resolved = config::resolve(cli.database_url.as_deref())?;
            let id = trace_id.parse().context("invalid trace id")?;
            trace_cmd::run(resolved, id).await
        }
        Commands::Cancel { task_id } => {
            let resolved = config::resolve(cli.database_url.as_deref())?;
            let id = task_id.parse().context("invalid task id")?;
            serve_cmd::cancel(resolved, id).await
        }
        Commands::Namespaces { refresh } => {
            let resolved = config::resolve(cli.database_url.as_deref())?;
            ns_cmd::run(resolved, refresh).await
        }
        Commands::RetryDead { task_id } => {
            let resolved = config::resolve(cli.database_url.as_deref())?;
            let id = task_id.parse().context("invalid task id")?;
            retry_cmd::run(resolved, id).await
        }
        Commands::Container { command } => {
            let resolved = config::resolve(cli.database_url.as_deref())?;
            match command {
                ContainerCommands::Register {
                    name,
                    image_ref,
                    version,
                    command,
                    env_schema,
                } => {
                    container_cmd::register(
                        resolved, &name, &version, &image_ref, command, env_schema,
                    )
                    .await
                }
                ContainerCommands::List { name } => container_cmd::list(resolved, &name).await,
            }
        }
    }
}
