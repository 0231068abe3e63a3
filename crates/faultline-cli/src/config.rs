//! Configuration file management.
//!
//! Provides a TOML-based config file at
//! `~/.config/faultline/config.toml` and a resolution chain:
//! CLI flag > env var > config file > default.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use faultline_core::config::EngineConfig;
use faultline_db::config::DbConfig;

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub database: DatabaseSection,
    /// Engine sections (`[system]`, `[k8s]`, `[injection]`,
    /// `[rate_limiting]`, `[algo]`, `[debugging]`).
    #[serde(flatten)]
    pub engine: EngineConfig,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DatabaseSection {
    pub url: String,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: DbConfig::DEFAULT_URL.to_owned(),
        }
    }
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the faultline config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/faultline` or
/// `~/.config/faultline`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("faultline");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("faultline")
}

/// Return the path to the config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file. Returns defaults if it does not
/// exist.
pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    if !path.exists() {
        return Ok(ConfigFile::default());
    }
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents).context("failed to parse config file")?;
    Ok(config)
}

/// Serialize and write the config file, creating parent dirs as needed.
pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct ResolvedConfig {
    pub db: DbConfig,
    pub engine: EngineConfig,
}

/// Resolve configuration: CLI flag > env var > config file > default.
pub fn resolve(database_url: Option<&str>) -> Result<ResolvedConfig> {
    let file = load_config()?;

    let db = if let Some(url) = database_url {
        DbConfig::new(url)
    } else if let Ok(url) = std::env::var("FAULTLINE_DATABASE_URL") {
        DbConfig::new(url)
    } else {
        DbConfig::new(file.database.url.clone())
    };

    Ok(ResolvedConfig {
        db,
        engine: file.engine,
    })
}
