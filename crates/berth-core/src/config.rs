//! berth.toml configuration parser.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::{DurationParseError, parse_duration};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BerthConfig {
    pub scheduler: SchedulerConfig,
    pub store: StoreConfig,
}

/// Placement and lifecycle policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// When false, resize and cold migrate never land back on the current host.
    pub allow_resize_to_same_host: bool,
    /// When true, a finished resize waits for confirm/revert instead of settling.
    pub confirm_resize: bool,
    /// Placement attempts when the agent reports a capacity conflict.
    pub max_placement_attempts: u32,
    /// Upper bound on a single agent move (e.g., "30s").
    pub agent_timeout: String,
    pub weights: WeightsConfig,
}

/// Weigher multipliers. Positive values spread load, negative values pack it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WeightsConfig {
    pub ram: f64,
    pub cpu: f64,
    pub disk: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StoreConfig {
    /// Path of the redb state file.
    pub path: PathBuf,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            allow_resize_to_same_host: false,
            confirm_resize: false,
            max_placement_attempts: 3,
            agent_timeout: "30s".to_string(),
            weights: WeightsConfig::default(),
        }
    }
}

impl Default for WeightsConfig {
    fn default() -> Self {
        Self {
            ram: 1.0,
            cpu: 0.0,
            disk: 0.0,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/berth/berth.redb"),
        }
    }
}

impl SchedulerConfig {
    pub fn agent_timeout(&self) -> Result<Duration, DurationParseError> {
        parse_duration(&self.agent_timeout)
    }
}

impl BerthConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: BerthConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.scheduler.max_placement_attempts == 0 {
            anyhow::bail!("scheduler.max_placement_attempts must be at least 1");
        }
        self.scheduler.agent_timeout()?;
        Ok(())
    }
}
