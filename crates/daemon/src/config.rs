// Daemon configuration.
//
// Global config lives at `~/.limpet/config.toml`; every field has a
// default so a missing or partial file works. The metadata database and
// the fs blob store default to paths under the same directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use limpet_common::DocClass;

use crate::fetcher::FetchSettings;

/// Root directory for limpet global state: `~/.limpet/`.
pub fn global_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".limpet"))
}

/// Path to the global config file: `~/.limpet/config.toml`.
pub fn global_config_path() -> Option<PathBuf> {
    global_dir().map(|d| d.join("config.toml"))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Metadata database path; defaults to `~/.limpet/limpet.db`.
    pub db_path: Option<PathBuf>,
    /// Audit-log ring cap, in bytes.
    pub log_maxsize: i64,

    /// Fetcher tuning.
    pub user_agent: String,
    pub requests_per_minute: u32,
    /// Per-request timeout, seconds.
    pub request_timeout: u64,
    /// Transient transport retries per fetch (0 disables).
    pub fetch_retries: u32,
    pub fetch_retry_wait_secs: u64,

    /// Per-document backoff budget.
    pub retry_attempts: u32,
    pub retry_wait_minutes: f64,

    /// Backend for doc classes that don't name one.
    pub default_storage_engine: String,

    /// Scheduler tick, seconds.
    pub tick_secs: u64,
    /// Worker pool size.
    pub workers: usize,
    /// Inspection-surface listen address.
    pub listen: String,

    pub storage: StorageConfig,
    pub doc_classes: HashMap<String, DocClass>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            log_maxsize: 100_000_000,
            user_agent: "limpet".into(),
            requests_per_minute: 60,
            request_timeout: 300,
            fetch_retries: 0,
            fetch_retry_wait_secs: 5,
            retry_attempts: 3,
            retry_wait_minutes: 60.0,
            default_storage_engine: "dummy".into(),
            tick_secs: 60,
            workers: 4,
            listen: "127.0.0.1:8044".into(),
            storage: StorageConfig::default(),
            doc_classes: HashMap::new(),
        }
    }
}

impl DaemonConfig {
    /// Load from `~/.limpet/config.toml`; defaults when the file is
    /// missing or unreadable.
    pub fn load() -> Self {
        global_config_path().and_then(|p| Self::load_from(&p).ok()).unwrap_or_default()
    }

    /// Load from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        let config: Self = toml::from_str(&contents).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolved metadata database path.
    pub fn db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .or_else(|| global_dir().map(|d| d.join("limpet.db")))
            .unwrap_or_else(|| PathBuf::from("limpet.db"))
    }

    /// Resolved root for the fs blob store.
    pub fn blob_root(&self) -> PathBuf {
        self.storage
            .fs
            .root
            .clone()
            .or_else(|| global_dir().map(|d| d.join("blobs")))
            .unwrap_or_else(|| PathBuf::from("blobs"))
    }

    pub fn fetch_settings(&self) -> FetchSettings {
        FetchSettings {
            user_agent: self.user_agent.clone(),
            request_timeout: Duration::from_secs(self.request_timeout),
            requests_per_minute: self.requests_per_minute,
            fetch_retries: self.fetch_retries,
            fetch_retry_wait: Duration::from_secs(self.fetch_retry_wait_secs),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (name, class) in &self.doc_classes {
            if let Some(mins) = class.update_mins {
                if mins <= 0.0 {
                    return Err(ConfigError::Invalid(format!(
                        "doc class `{name}`: update_mins must be positive \
                         (omit it for one-shot classes)"
                    )));
                }
            }
        }
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct StorageConfig {
    pub fs: FsStorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct FsStorageConfig {
    /// Blob root; defaults to `~/.limpet/blobs`.
    pub root: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(std::io::Error),
    #[error("config parse error: {0}")]
    Parse(toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}
