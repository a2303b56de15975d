//! Session configuration.
//!
//! Loaded from `~/.habitdeck/config.json` when present, otherwise defaults.
//! Command-line and environment overrides are applied by [`crate::cli::Cli`].
//! A `refreshIntervalSecs` of 0 disables periodic refresh.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::api::RetryPolicy;
use crate::error::SyncError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Base URL of the backend; `/api/...` is appended to it.
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Retry policy for idempotent reads.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Share one in-flight request between concurrent fetches of the same slot.
    #[serde(default = "default_coalesce_in_flight")]
    pub coalesce_in_flight: bool,
    /// Periodic full refresh. None means refresh only on demand.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_interval_secs: Option<u64>,
    /// Cap on retained log entries. None keeps everything.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_capacity: Option<usize>,
}

fn default_api_url() -> String {
    "http://localhost:5000".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_coalesce_in_flight() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            request_timeout_secs: default_request_timeout_secs(),
            retry: RetryPolicy::default(),
            coalesce_in_flight: default_coalesce_in_flight(),
            refresh_interval_secs: None,
            log_capacity: None,
        }
    }
}

/// Get the canonical config file path (~/.habitdeck/config.json)
pub fn config_path() -> Result<PathBuf, SyncError> {
    let home = dirs::home_dir()
        .ok_or_else(|| SyncError::Config("Could not find home directory".to_string()))?;
    Ok(home.join(".habitdeck").join("config.json"))
}

/// Read a config file. A missing file yields the defaults.
pub fn load_config_from(path: &Path) -> Result<Config, SyncError> {
    if !path.exists() {
        log::info!("No config at {}, using defaults", path.display());
        return Ok(Config::default());
    }

    let content = fs::read_to_string(path)
        .map_err(|e| SyncError::Config(format!("Failed to read config: {}", e)))?;

    let mut config: Config = serde_json::from_str(&content)
        .map_err(|e| SyncError::Config(format!("Failed to parse config: {}", e)))?;
    if config.refresh_interval_secs == Some(0) {
        config.refresh_interval_secs = None;
    }
    Ok(config)
}

/// Load the config file from its canonical path.
pub fn load_config() -> Result<Config, SyncError> {
    load_config_from(&config_path()?)
}
