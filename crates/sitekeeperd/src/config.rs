//! Daemon configuration.
//!
//! One TOML file carries the site settings, the generator thresholds,
//! the broker connection and the tabular device list. The device table
//! keeps the columns of the original deployment sheets, so `enabled`
//! accepts both `0`/`1` integers and booleans.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer};
use sitekeeper_transport::MqttSettings;
use thiserror::Error;

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/sitekeeper/config.toml";

/// Errors that can occur loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration file could not be parsed
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// One device row is unusable; the row is skipped, not fatal
    #[error("invalid device row for {server_path}: {reason}")]
    InvalidRow { server_path: String, reason: String },
}

/// Generator hysteresis trip points, in percent state of charge.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Below this average the generator relay closes
    pub lower_soc: f64,

    /// Above this average the generator relay opens
    pub upper_soc: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            lower_soc: 30.0,
            upper_soc: 90.0,
        }
    }
}

/// One row of the device table.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceRow {
    /// Whether the row produces a device; disabled rows are skipped silently
    #[serde(deserialize_with = "deserialize_enabled")]
    pub enabled: bool,

    /// Device kind identifier ("relay" or "modbus")
    #[serde(rename = "type")]
    pub device_type: String,

    /// Opaque protocol-specific settings (Modbus register map)
    #[serde(default)]
    pub settings: String,

    /// Server-side path identifying the device
    pub server_path: String,

    /// Endpoint hostname or address
    pub host: String,

    /// Endpoint port
    pub port: u16,

    /// Seconds between poll cycles
    pub polling_interval: u64,
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server-side folder computed values are published under
    pub site_path: String,

    /// Use the `[[sim_devices]]` table instead of `[[devices]]`
    #[serde(default)]
    pub sim: bool,

    /// Verbose per-cycle device logging
    #[serde(default)]
    pub device_diagnostics: bool,

    /// Alarm notification recipients
    #[serde(default)]
    pub alarm_recipients: Vec<String>,

    /// Generator hysteresis trip points
    #[serde(default)]
    pub thresholds: Thresholds,

    /// Broker connection settings
    #[serde(default)]
    pub mqtt: MqttSettings,

    /// Production device table
    #[serde(default)]
    pub devices: Vec<DeviceRow>,

    /// Simulated device table, used when `sim` is set
    #[serde(default)]
    pub sim_devices: Vec<DeviceRow>,
}

impl Config {
    /// Loads and parses the configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Returns the device table for the selected mode.
    pub fn device_rows(&self, sim: bool) -> &[DeviceRow] {
        if sim {
            &self.sim_devices
        } else {
            &self.devices
        }
    }
}

/// Accepts `enabled = 1`, `enabled = 0` and `enabled = true/false`.
fn deserialize_enabled<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Enabled {
        Flag(bool),
        Numeric(i64),
    }

    match Enabled::deserialize(deserializer)? {
        Enabled::Flag(flag) => Ok(flag),
        Enabled::Numeric(n) => Ok(n != 0),
    }
}
