//! Configuration loading and database path resolution
//!
//! Bootstrap configuration only: database location, pool tuning and
//! logging. Engine behaviour is configured through the `settings` table.

use crate::db::init::DatabaseOptions;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Environment variable overriding the database path
pub const DATABASE_ENV_VAR: &str = "MLM_DATABASE";

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// Path to SQLite database file (optional)
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Connection pool tuning
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Connection pool section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl DatabaseConfig {
    pub fn to_options(&self) -> DatabaseOptions {
        DatabaseOptions {
            max_connections: self.max_connections.max(1),
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
            ..DatabaseOptions::default()
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_max_connections() -> u32 {
    20
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Load TOML configuration from an explicit path
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
}

/// Load TOML configuration, falling back to defaults when no file exists
///
/// A file that exists but fails to parse is still an error.
pub fn load_or_default(explicit: Option<&Path>) -> Result<TomlConfig> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match default_config_path() {
            Some(path) => path,
            None => return Ok(TomlConfig::default()),
        },
    };

    if !path.exists() {
        warn!("Config file {} not found, using defaults", path.display());
        return Ok(TomlConfig::default());
    }

    load_toml_config(&path)
}

/// Write TOML configuration (used by `init` to leave an editable file)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, content)?;
    Ok(())
}

/// Database path resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_database_path(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    config: &TomlConfig,
) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = &config.database_path {
        return path.clone();
    }

    default_database_path()
}

/// Platform config file location (`<config_dir>/mlm/config.toml`)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("mlm").join("config.toml"))
}

/// Get OS-dependent default database path
pub fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("mlm"))
        .unwrap_or_else(|| PathBuf::from("./mlm_data"))
        .join("mlm.db")
}
