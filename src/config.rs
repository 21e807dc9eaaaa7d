//! Server configuration.
//!
//! Resolution order: built-in defaults, then `<config_dir>/automode/config.json`,
//! then `AUTOMODE_*` environment variables, then command-line flags.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};

use crate::models::FeatureStatus;
use crate::scheduler::{SchedulerConfig, DEFAULT_MAX_CONCURRENCY};

const APP_NAME: &str = "automode";
const CONFIG_FILE: &str = "config.json";

/// Default port for the HTTP API.
pub const DEFAULT_PORT: u16 = 17010;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub port: u16,
    /// SQLite file. Defaults to the platform data directory.
    pub database_path: Option<PathBuf>,
    pub default_max_concurrency: usize,
    /// Status for successfully finished features: `waiting_approval` or `verified`.
    pub success_status: FeatureStatus,
    pub tick_interval_ms: u64,
    /// Shell command run for each dispatched feature.
    pub agent_command: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            database_path: None,
            default_max_concurrency: DEFAULT_MAX_CONCURRENCY,
            success_status: FeatureStatus::WaitingApproval,
            tick_interval_ms: 5000,
            agent_command: None,
        }
    }
}

impl Config {
    /// Load the config file (if any) and apply environment overrides.
    /// Falls back to defaults if the file fails to parse.
    pub fn load() -> Self {
        let mut config = match get_config_path().and_then(|path| Self::load_from(&path)) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config, using defaults: {:#}", e);
                Self::default()
            }
        };
        config.apply_env(|name| std::env::var(name).ok());
        config
    }

    /// Read a config file. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).context("Failed to read config file")?;
        let config = serde_json::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Persist the configuration to the user's config directory.
    pub fn save(&self) -> Result<PathBuf> {
        let path = get_config_path()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&path, content).context("Failed to write config file")?;
        Ok(path)
    }

    /// Apply `AUTOMODE_*` overrides. Unparseable values are ignored with a warning.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(port) = var("AUTOMODE_PORT") {
            match port.parse() {
                Ok(port) => self.port = port,
                Err(_) => tracing::warn!("Ignoring invalid AUTOMODE_PORT: {}", port),
            }
        }
        if let Some(path) = var("AUTOMODE_DB") {
            self.database_path = Some(PathBuf::from(path));
        }
        if let Some(max) = var("AUTOMODE_MAX_CONCURRENCY") {
            match max.parse::<usize>() {
                Ok(max) if max > 0 => self.default_max_concurrency = max,
                _ => tracing::warn!("Ignoring invalid AUTOMODE_MAX_CONCURRENCY: {}", max),
            }
        }
        if let Some(command) = var("AUTOMODE_AGENT_COMMAND") {
            self.agent_command = Some(command);
        }
        if let Some(flag) = var("AUTOMODE_AUTO_VERIFY") {
            self.success_status = if matches!(flag.as_str(), "1" | "true" | "yes") {
                FeatureStatus::Verified
            } else {
                FeatureStatus::WaitingApproval
            };
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        let success_status = match self.success_status {
            FeatureStatus::Verified => FeatureStatus::Verified,
            FeatureStatus::WaitingApproval => FeatureStatus::WaitingApproval,
            other => {
                tracing::warn!(
                    "success_status '{}' is not allowed, using waiting_approval",
                    other
                );
                FeatureStatus::WaitingApproval
            }
        };

        SchedulerConfig {
            default_max_concurrency: self.default_max_concurrency.max(1),
            success_status,
            tick_interval: Duration::from_millis(self.tick_interval_ms),
        }
    }
}

fn get_config_path() -> Result<PathBuf> {
    let mut path =
        config_dir().ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
    path.push(APP_NAME);
    path.push(CONFIG_FILE);
    Ok(path)
}
