//! Service configuration.
//!
//! Layered with Figment: struct defaults, then an optional YAML file, then
//! `TRACKSRV_`-prefixed environment variables (nested keys separated with
//! `__`, e.g. `TRACKSRV_SUNTECH__PORT=3002`).

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackSrvError};

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "TRACKSRV_";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Service-level settings
    #[serde(default)]
    pub service: ServiceConfig,

    /// GT-06 protocol listener
    #[serde(default = "ListenerConfig::gt06_defaults")]
    pub gt06: ListenerConfig,

    /// Suntech protocol listener
    #[serde(default = "ListenerConfig::suntech_defaults")]
    pub suntech: ListenerConfig,

    /// Device roster seeded into the in-memory store at startup
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
}

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service name
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Log output directory (file mode)
    #[serde(default = "default_log_dir")]
    pub log_dir: String,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log to console instead of rolling files
    #[serde(default)]
    pub console: bool,
}

/// One protocol listener's bind settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Whether this listener is started
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Bind address
    #[serde(default = "default_bind")]
    pub bind: String,

    /// TCP port
    pub port: u16,

    /// Per-connection idle read timeout in seconds; absent means no timeout
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,
}

/// One seeded device entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceEntry {
    /// IMEI or equivalent hardware identifier
    pub hardware_id: String,

    /// Linked vehicle, if the device is mounted
    #[serde(default)]
    pub vehicle_id: Option<i64>,

    #[serde(default)]
    pub title: String,

    #[serde(default = "default_icon")]
    pub icon: String,
}

impl ListenerConfig {
    fn gt06_defaults() -> Self {
        Self {
            enabled: true,
            bind: default_bind(),
            port: 5023,
            idle_timeout_secs: None,
        }
    }

    fn suntech_defaults() -> Self {
        Self {
            enabled: true,
            bind: default_bind(),
            port: 1150,
            // Suntech trackers heartbeat every few minutes; the protocol
            // caps silent connections at 30 minutes
            idle_timeout_secs: Some(1800),
        }
    }

    /// Idle read timeout as a `Duration`, if configured.
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_dir: default_log_dir(),
            log_level: default_log_level(),
            console: false,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            gt06: ListenerConfig::gt06_defaults(),
            suntech: ListenerConfig::suntech_defaults(),
            devices: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load configuration: defaults, then the YAML file (when given), then
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }

        let config: AppConfig = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Structural validation beyond what serde can express.
    pub fn validate(&self) -> Result<()> {
        if self.gt06.enabled && self.gt06.port == 0 {
            return Err(TrackSrvError::config("gt06 listener port cannot be zero"));
        }
        if self.suntech.enabled && self.suntech.port == 0 {
            return Err(TrackSrvError::config(
                "suntech listener port cannot be zero",
            ));
        }
        if self.gt06.enabled
            && self.suntech.enabled
            && self.gt06.port == self.suntech.port
            && self.gt06.bind == self.suntech.bind
        {
            return Err(TrackSrvError::config(format!(
                "gt06 and suntech listeners both bind {}:{}",
                self.gt06.bind, self.gt06.port
            )));
        }

        let mut seen = HashSet::new();
        for entry in &self.devices {
            if entry.hardware_id.is_empty() {
                return Err(TrackSrvError::config("device entry with empty hardware_id"));
            }
            if !seen.insert(entry.hardware_id.as_str()) {
                return Err(TrackSrvError::config(format!(
                    "duplicate device hardware_id: {}",
                    entry.hardware_id
                )));
            }
        }

        Ok(())
    }
}

// Default value functions
fn default_service_name() -> String {
    "tracksrv".to_string()
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_true() -> bool {
    true
}

fn default_icon() -> String {
    "car".to_string()
}
