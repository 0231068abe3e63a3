//! Connection settings for the shared store.
//!
//! Several processes contend on one database (the consumer, the
//! scheduler, the cluster controller, one-shot CLI verbs). Each tags
//! its connections with an `application_name` so `pg_stat_activity`
//! can tell a wedged consumer from a wedged controller, and sizes its
//! pool for its own workload.

use std::env;
use std::time::Duration;

/// Settings for one process's connections to the store.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Full PostgreSQL connection URL.
    pub database_url: String,
    /// Pool size. Workers block on the store, so this bounds how many
    /// queue operations run at once, not how many tasks do.
    pub max_connections: u32,
    /// How long to wait for a pooled connection before giving up.
    pub acquire_timeout: Duration,
    /// Reported as `application_name` on every connection.
    pub application_name: String,
}

impl DbConfig {
    /// Connection URL used when nothing else is configured.
    pub const DEFAULT_URL: &str = "postgresql://localhost:5432/faultline";

    const DEFAULT_MAX_CONNECTIONS: u32 = 10;
    const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

    /// Build a config from the environment.
    ///
    /// `FAULTLINE_DATABASE_URL` selects the database;
    /// `FAULTLINE_DB_MAX_CONNECTIONS` overrides the pool size (values
    /// that do not parse fall back to the default).
    pub fn from_env() -> Self {
        let mut config = Self::new(
            env::var("FAULTLINE_DATABASE_URL").unwrap_or_else(|_| Self::DEFAULT_URL.to_owned()),
        );
        if let Some(max) = env::var("FAULTLINE_DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|raw| raw.parse().ok())
        {
            config.max_connections = max;
        }
        config
    }

    /// Build a config from an explicit URL with default sizing.
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            max_connections: Self::DEFAULT_MAX_CONNECTIONS,
            acquire_timeout: Self::DEFAULT_ACQUIRE_TIMEOUT,
            application_name: "faultline".to_owned(),
        }
    }

    /// Tag this process's connections.
    pub fn with_application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = name.into();
        self
    }

    /// The database name embedded in the URL, when one is present.
    ///
    /// A URL without a path component (`postgresql://host:5432`) has no
    /// database name; so does one ending in a bare slash.
    pub fn database_name(&self) -> Option<&str> {
        let (head, name) = self.database_url.rsplit_once('/')?;
        // An empty segment, a split inside `://`, or a host[:port]
        // segment means the URL carries no database name.
        if name.is_empty() || head.ends_with('/') || name.contains(':') || name.contains('@') {
            return None;
        }
        Some(name)
    }

    /// URL of the `postgres` maintenance database on the same server,
    /// for admin statements (`CREATE DATABASE`) that cannot run inside
    /// the target database.
    pub fn maintenance_url(&self) -> String {
        match self.database_name() {
            Some(name) => {
                let head = &self.database_url[..self.database_url.len() - name.len()];
                format!("{head}postgres")
            }
            None => format!("{}/postgres", self.database_url.trim_end_matches('/')),
        }
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
