use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use vesta_devices::{DeviceSettings, RetryPolicy};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cycle: CycleConfig,
    pub retry: RetryPolicy,
    pub store: StoreConfig,
    pub transport: TransportConfig,
    pub simulation: SimulationConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn device_settings(&self) -> DeviceSettings {
        DeviceSettings {
            retry: self.retry.clone(),
            history_limit: self.store.history_limit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CycleConfig {
    pub interval_ms: u64,
}

impl CycleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self { interval_ms: 1000 }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub history_limit: Option<usize>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            history_limit: Some(100),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Share of outbound commands silently lost, 0.0 to 1.0.
    pub drop_ratio: f64,
    pub queue_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            drop_ratio: 0.3,
            queue_size: 64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub plug_count: usize,
    pub button_count: usize,
    /// Every this many cycles the bot flips each plug.
    pub toggle_every_cycles: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            plug_count: 2,
            button_count: 1,
            toggle_every_cycles: 5,
        }
    }
}
