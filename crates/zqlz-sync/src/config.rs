//! Sync configuration
//!
//! Stored as JSON next to the other zqlz settings files.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use zqlz_core::{Result, ZqlzError};

const DEFAULT_API_BASE_URL: &str = "https://api.zqlz.dev/v1";

/// Configuration for the connection sync service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Location of the local record store. `None` uses the config directory.
    pub store_path: Option<PathBuf>,
    /// Base URL of the remote connection API
    pub api_base_url: String,
    /// Timeout for each remote request, in seconds
    pub request_timeout_secs: u64,
    /// Run a reconciliation cycle on this interval, in seconds
    pub sync_interval_secs: Option<u64>,
    /// Run a reconciliation cycle as soon as the service starts
    pub sync_on_startup: bool,
}

impl SyncConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = Some(path.into());
        self
    }

    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_secs = timeout.as_secs().max(1);
        self
    }

    /// Enable periodic sync. `None` disables the timer.
    pub fn with_sync_interval(mut self, interval: Option<Duration>) -> Self {
        self.sync_interval_secs = interval.map(|i| i.as_secs().max(1));
        self
    }

    pub fn with_sync_on_startup(mut self, enabled: bool) -> Self {
        self.sync_on_startup = enabled;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn sync_interval(&self) -> Option<Duration> {
        self.sync_interval_secs.map(Duration::from_secs)
    }

    /// Where the record store lives, falling back to the config directory
    pub fn resolved_store_path(&self) -> Result<PathBuf> {
        match &self.store_path {
            Some(path) => Ok(path.clone()),
            None => Self::config_dir()
                .map(|dir| dir.join("sync.db"))
                .map_err(config_error),
        }
    }

    /// Default location of the config file
    pub fn default_path() -> Result<PathBuf> {
        Self::config_dir()
            .map(|dir| dir.join("sync.json"))
            .map_err(config_error)
    }

    fn config_dir() -> anyhow::Result<PathBuf> {
        dirs::config_dir()
            .context("Could not determine config directory")
            .map(|p| p.join("zqlz"))
    }

    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = ?path, "no sync config found, using defaults");
            return Ok(Self::default());
        }

        let load = || -> anyhow::Result<Self> {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read sync config from {:?}", path))?;
            serde_json::from_str(&content).with_context(|| "Failed to parse sync config JSON")
        };

        load().map_err(config_error)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let save = || -> anyhow::Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {:?}", parent))?;
            }
            let content = serde_json::to_string_pretty(self)?;
            std::fs::write(path, content)
                .with_context(|| format!("Failed to write sync config to {:?}", path))?;
            Ok(())
        };

        save().map_err(config_error)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            store_path: None,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout_secs: 30,
            sync_interval_secs: None,
            sync_on_startup: true,
        }
    }
}

fn config_error(err: anyhow::Error) -> ZqlzError {
    ZqlzError::Configuration(format!("{:#}", err))
}
