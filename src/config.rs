// Optional settings file, read once at startup

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::monitor::{MonitorConfig, DEFAULT_SCAN_INTERVAL};

const CONFIG_DIR: &str = "pingtrack";
const CONFIG_FILE: &str = "config.json";

/// Settings file structure
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Settings {
    /// Scan interval in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Measure latency of established connections
    #[serde(default = "default_ping_enabled")]
    pub ping_enabled: bool,

    /// Initial app name filter
    #[serde(default)]
    pub filter: Option<String>,

    /// Preferred connection source ("procfs", "netstat")
    #[serde(default)]
    pub source: Option<String>,

    /// How often the table re-reads the monitor, in milliseconds
    #[serde(default = "default_refresh_ms")]
    pub refresh_ms: u64,
}

fn default_interval_ms() -> u64 {
    DEFAULT_SCAN_INTERVAL.as_millis() as u64
}

fn default_ping_enabled() -> bool {
    true
}

fn default_refresh_ms() -> u64 {
    2000
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            ping_enabled: default_ping_enabled(),
            filter: None,
            source: None,
            refresh_ms: default_refresh_ms(),
        }
    }
}

impl Settings {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Loads an explicitly given file, or the default one if it exists.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load_from(path);
        }

        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => {
                log::debug!("Settings file not found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents =
            fs::read_to_string(path).context(format!("Failed to read settings file: {:?}", path))?;

        let settings: Settings =
            serde_json::from_str(&contents).context(format!("Failed to parse settings file: {:?}", path))?;

        log::info!("Loaded settings from {:?}", path);
        Ok(settings)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }

    pub fn refresh(&self) -> Duration {
        Duration::from_millis(self.refresh_ms.max(50))
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            interval: self.interval(),
            ping_enabled: self.ping_enabled,
            ..MonitorConfig::default()
        }
    }
}
