//! Configuration loading and data folder resolution
//!
//! Missing configuration is never fatal: an absent or unreadable TOML file
//! logs a warning and compiled defaults apply. Malformed TOML is an error.

use crate::{Error, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "TBA_CONFIG";

/// Environment variable naming the data folder
pub const DATA_FOLDER_ENV_VAR: &str = "TBA_DATA_FOLDER";

/// Database file name inside the data folder
pub const DATABASE_FILE_NAME: &str = "taxbudget.db";

/// Raw TOML file contents; every field optional
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub data_folder: Option<PathBuf>,
    pub server: ServerSection,
    pub database: DatabaseSection,
    pub cache: CacheSection,
    pub updater: UpdaterSection,
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub bind: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub path: Option<PathBuf>,
    pub busy_timeout_ms: Option<u64>,
    pub max_connections: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub backend: Option<CacheBackendKind>,
    pub fallback_ttl_secs: Option<u64>,
    pub max_capacity: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct UpdaterSection {
    pub mode: Option<UpdateMode>,
    pub queue_capacity: Option<usize>,
    pub workers: Option<usize>,
    pub max_attempts: Option<u32>,
    pub initial_backoff_ms: Option<u64>,
    pub max_backoff_ms: Option<u64>,
    pub rebuild_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: Option<String>,
}

/// Which cache tier backend to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackendKind {
    /// `cache_entries` table in the main database, shared across processes
    Database,
    /// In-process moka cache
    Memory,
}

/// Which update strategy handles newly recorded submissions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateMode {
    /// Background worker applies increments and refreshes the cache
    Queued,
    /// Request path only invalidates the cache
    Synchronous,
}

/// Database connection settings
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub busy_timeout_ms: u64,
    pub max_connections: u32,
}

/// Cache tier settings
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub backend: CacheBackendKind,
    /// Lifetime of snapshots computed from raw ledger rows
    pub fallback_ttl: Duration,
    pub max_capacity: u64,
}

/// Update pipeline settings
#[derive(Debug, Clone)]
pub struct UpdaterConfig {
    pub mode: UpdateMode,
    pub queue_capacity: usize,
    pub workers: usize,
    pub retry: RetryPolicy,
    /// None disables the scheduled rebuild
    pub rebuild_interval: Option<Duration>,
}

/// Bounded exponential backoff for transient storage errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_millis(1000),
        }
    }
}

/// Fully resolved application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_folder: PathBuf,
    pub bind: SocketAddr,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub updater: UpdaterConfig,
    pub log_level: String,
}

impl AppConfig {
    /// Resolve configuration from CLI overrides, environment and TOML file
    pub fn load(cli_config: Option<&Path>, cli_data_folder: Option<&Path>) -> Result<Self> {
        let toml_config = match locate_config_file(cli_config) {
            Some(path) => load_toml_file(&path)?,
            None => {
                warn!("No config file found, using compiled defaults");
                TomlConfig::default()
            }
        };

        let data_folder = resolve_data_folder(cli_data_folder, toml_config.data_folder.as_deref());
        Self::from_toml(toml_config, data_folder)
    }

    /// Apply defaults to a parsed TOML config
    pub fn from_toml(toml_config: TomlConfig, data_folder: PathBuf) -> Result<Self> {
        let bind_text = toml_config
            .server
            .bind
            .unwrap_or_else(|| "127.0.0.1:5780".to_string());
        let bind: SocketAddr = bind_text
            .parse()
            .map_err(|e| Error::Config(format!("Invalid server.bind {:?}: {}", bind_text, e)))?;

        let database_path = toml_config
            .database
            .path
            .unwrap_or_else(|| data_folder.join(DATABASE_FILE_NAME));

        let max_attempts = toml_config.updater.max_attempts.unwrap_or(3);
        if max_attempts == 0 {
            return Err(Error::Config("updater.max_attempts must be at least 1".to_string()));
        }
        let workers = toml_config.updater.workers.unwrap_or(2);
        if workers == 0 {
            return Err(Error::Config("updater.workers must be at least 1".to_string()));
        }
        let queue_capacity = toml_config.updater.queue_capacity.unwrap_or(1024);
        if queue_capacity == 0 {
            return Err(Error::Config("updater.queue_capacity must be at least 1".to_string()));
        }

        Ok(Self {
            data_folder,
            bind,
            database: DatabaseConfig {
                path: database_path,
                busy_timeout_ms: toml_config.database.busy_timeout_ms.unwrap_or(5000),
                max_connections: toml_config.database.max_connections.unwrap_or(10).max(1),
            },
            cache: CacheConfig {
                backend: toml_config.cache.backend.unwrap_or(CacheBackendKind::Database),
                fallback_ttl: Duration::from_secs(toml_config.cache.fallback_ttl_secs.unwrap_or(300)),
                max_capacity: toml_config.cache.max_capacity.unwrap_or(1000),
            },
            updater: UpdaterConfig {
                mode: toml_config.updater.mode.unwrap_or(UpdateMode::Queued),
                queue_capacity,
                workers,
                retry: RetryPolicy {
                    max_attempts,
                    initial_backoff: Duration::from_millis(
                        toml_config.updater.initial_backoff_ms.unwrap_or(50),
                    ),
                    max_backoff: Duration::from_millis(
                        toml_config.updater.max_backoff_ms.unwrap_or(1000),
                    ),
                },
                rebuild_interval: toml_config
                    .updater
                    .rebuild_interval_secs
                    .filter(|secs| *secs > 0)
                    .map(Duration::from_secs),
            },
            log_level: toml_config.logging.level.unwrap_or_else(|| "info".to_string()),
        })
    }
}

/// Parse a TOML config file
pub fn load_toml_file(path: &Path) -> Result<TomlConfig> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            warn!("Could not read config file {}: {} (using defaults)", path.display(), e);
            return Ok(TomlConfig::default());
        }
    };

    let config = toml::from_str::<TomlConfig>(&content)
        .map_err(|e| Error::Config(format!("Invalid config file {}: {}", path.display(), e)))?;
    info!("Loaded config file: {}", path.display());
    Ok(config)
}

/// Config file resolution priority:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. User config directory
/// 4. System-wide config (Unix only)
pub fn locate_config_file(cli_arg: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    if let Some(path) = dirs::config_dir().map(|d| d.join("taxbudget").join("config.toml")) {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(unix) {
        let system_config = PathBuf::from("/etc/taxbudget/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Data folder resolution priority:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_data_folder(cli_arg: Option<&Path>, toml_value: Option<&Path>) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(DATA_FOLDER_ENV_VAR) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(path) = toml_value {
        return path.to_path_buf();
    }

    default_data_folder()
}

/// Get OS-dependent default data folder path
pub fn default_data_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("taxbudget"))
        .unwrap_or_else(|| PathBuf::from("./taxbudget_data"))
}
