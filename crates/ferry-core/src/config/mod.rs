//! Configuration for the offline store and sync orchestrator.
//!
//! [`FerryConfig`] is the on-disk JSON form shared by every client; it is
//! turned into the runtime [`SyncSettings`] consumed by the orchestrator.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::queue::DEFAULT_MAX_ATTEMPTS;
use crate::util::{is_http_url, normalize_text_option};

/// Default period of the fallback drain timer
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// Default upper bound on a single dispatch
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(30);

const CONFIG_SCHEMA_VERSION: u32 = 1;

/// Runtime settings for draining the queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Period of the fallback drain timer (`None` disables it)
    pub sync_interval: Option<Duration>,
    /// Upper bound on a single dispatch; exceeding it counts as a failure
    pub task_timeout: Duration,
    /// Failed attempts before a task is dead-lettered (`None` retries forever)
    pub max_attempts: Option<u32>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            sync_interval: Some(DEFAULT_SYNC_INTERVAL),
            task_timeout: DEFAULT_TASK_TIMEOUT,
            max_attempts: Some(DEFAULT_MAX_ATTEMPTS),
        }
    }
}

impl SyncSettings {
    /// Set the fallback drain interval
    #[must_use]
    pub const fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = Some(interval);
        self
    }

    /// Disable the fallback timer (connectivity and manual triggers only)
    #[must_use]
    pub const fn without_auto_sync(mut self) -> Self {
        self.sync_interval = None;
        self
    }

    /// Set the per-task dispatch timeout
    #[must_use]
    pub const fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    /// Set the attempt cap; `None` retries forever
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

/// Persistent client configuration (`ferry.json`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FerryConfig {
    #[serde(default = "default_config_version")]
    pub version: u32,
    /// Path of the local store database
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    /// Base URL the HTTP dispatcher posts tasks to
    #[serde(default)]
    pub api_base_url: Option<String>,
    #[serde(default)]
    pub sync_interval_secs: Option<u64>,
    #[serde(default)]
    pub task_timeout_secs: Option<u64>,
    /// `0` means unbounded retries
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

const fn default_config_version() -> u32 {
    CONFIG_SCHEMA_VERSION
}

impl Default for FerryConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_SCHEMA_VERSION,
            db_path: None,
            api_base_url: None,
            sync_interval_secs: None,
            task_timeout_secs: None,
            max_attempts: None,
        }
    }
}

impl FerryConfig {
    /// Load configuration from a JSON file; a missing file yields defaults.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw).map_err(|error| {
            Error::Config(format!("Failed to parse {}: {error}", path.display()))
        })
    }

    /// Parse and validate a raw JSON payload
    pub fn parse(raw: &str) -> Result<Self> {
        let mut config = serde_json::from_str::<Self>(raw)?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as pretty JSON, creating parent directories.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let payload = serde_json::to_string_pretty(self)?;
        std::fs::write(path, format!("{payload}\n"))?;
        Ok(())
    }

    /// Apply `FERRY_DB_PATH` / `FERRY_API_BASE_URL` overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(
            std::env::var_os("FERRY_DB_PATH").map(PathBuf::from),
            std::env::var("FERRY_API_BASE_URL").ok(),
        );
    }

    fn apply_overrides(&mut self, db_path: Option<PathBuf>, api_base_url: Option<String>) {
        if let Some(db_path) = db_path.filter(|path| !path.as_os_str().is_empty()) {
            self.db_path = Some(db_path);
        }
        if let Some(url) = normalize_text_option(api_base_url) {
            self.api_base_url = Some(url.trim_end_matches('/').to_string());
        }
    }

    fn normalize(&mut self) {
        self.api_base_url = normalize_text_option(self.api_base_url.take())
            .map(|url| url.trim_end_matches('/').to_string());
    }

    fn validate(&self) -> Result<()> {
        if self.version != CONFIG_SCHEMA_VERSION {
            return Err(Error::Config(format!(
                "unsupported config version {} (expected {CONFIG_SCHEMA_VERSION})",
                self.version
            )));
        }
        if let Some(url) = &self.api_base_url {
            if !is_http_url(url) {
                return Err(Error::Config(
                    "api_base_url must include http:// or https://".to_string(),
                ));
            }
        }
        if self.task_timeout_secs == Some(0) {
            return Err(Error::Config(
                "task_timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Runtime drain settings derived from this configuration
    pub fn sync_settings(&self) -> SyncSettings {
        let mut settings = SyncSettings::default();
        match self.sync_interval_secs {
            Some(0) => settings = settings.without_auto_sync(),
            Some(secs) => settings = settings.with_sync_interval(Duration::from_secs(secs)),
            None => {}
        }
        if let Some(secs) = self.task_timeout_secs {
            settings = settings.with_task_timeout(Duration::from_secs(secs));
        }
        match self.max_attempts {
            Some(0) => settings = settings.with_max_attempts(None),
            Some(max) => settings = settings.with_max_attempts(Some(max)),
            None => {}
        }
        settings
    }
}
