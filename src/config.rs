//! Daemon configuration, read once at startup from a TOML file.
//!
//! ```toml
//! default_profile = "Desktop"
//!
//! [daemon]
//! tick_interval_ms = 4
//! read_timeout_ms = 1000
//! max_slots = 4
//!
//! [control]
//! socket_path = "/run/user/1000/padbridge.sock"
//!
//! [[profiles]]
//! name = "Desktop"
//! [[profiles.bindings]]
//! source = "RPAD_X"
//! action = "mouse(REL_X, 1.5)"
//!
//! [[autoswitch]]
//! class = "^firefox$"
//! profile = "Desktop"
//! ```
//!
//! Every section is optional. Without a file the daemon runs the built-in
//! Xbox-style profile on every slot.

use crate::control::server::ControlSettings;
use crate::controller::decoder::generic::{GenericDevice, GenericDeviceConfig};
use crate::device::manager::ManagerSettings;
use crate::device::session::SessionSettings;
use crate::mapping::autoswitch::AutoswitchRuleConfig;
use crate::mapping::manager::PipelineSettings;
use crate::mapping::profile::ProfileConfig;
use crate::output::device::OutputSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

pub const CONFIG_ENV: &str = "PADBRIDGE_CONFIG";
const CONFIG_DIR: &str = "padbridge";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {error}", path.display())]
    Read { path: PathBuf, error: std::io::Error },

    #[error("failed to parse {}: {error}", path.display())]
    Parse { path: PathBuf, error: toml::de::Error },

    #[error("generic device '{name}': {reason}")]
    GenericDevice { name: String, reason: String },

    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Durations as integer milliseconds.
pub mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis().try_into().unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonSection {
    pub tick_interval_ms: u64,
    pub read_timeout_ms: u64,
    pub max_read_timeouts: u32,
    pub max_malformed_reports: u32,
    pub retry_interval_ms: u64,
    pub max_slots: u8,
    pub shutdown_grace_ms: u64,
    pub haptic_queue: usize,
    /// Publish button edges to `buttons` subscribers
    pub diagnostics: bool,
}

impl Default for DaemonSection {
    fn default() -> Self {
        let session = SessionSettings::default();
        let manager = ManagerSettings::default();
        let pipeline = PipelineSettings::default();
        Self {
            tick_interval_ms: pipeline.tick_interval.as_millis() as u64,
            read_timeout_ms: session.read_timeout.as_millis() as u64,
            max_read_timeouts: session.max_read_timeouts,
            max_malformed_reports: session.max_malformed_reports,
            retry_interval_ms: manager.retry_interval.as_millis() as u64,
            max_slots: manager.max_slots,
            shutdown_grace_ms: 2000,
            haptic_queue: session.haptic_queue,
            diagnostics: pipeline.diagnostics,
        }
    }
}

impl DaemonSection {
    pub fn manager_settings(&self) -> ManagerSettings {
        ManagerSettings {
            max_slots: self.max_slots,
            retry_interval: Duration::from_millis(self.retry_interval_ms),
            session: SessionSettings {
                read_timeout: Duration::from_millis(self.read_timeout_ms),
                max_read_timeouts: self.max_read_timeouts,
                max_malformed_reports: self.max_malformed_reports,
                haptic_queue: self.haptic_queue,
            },
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            tick_interval: Duration::from_millis(self.tick_interval_ms),
            diagnostics: self.diagnostics,
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub daemon: DaemonSection,
    pub control: ControlSettings,
    pub output: OutputSettings,
    pub default_profile: Option<String>,
    pub generic_devices: Vec<GenericDeviceConfig>,
    pub profiles: Vec<ProfileConfig>,
    pub autoswitch: Vec<AutoswitchRuleConfig>,
}

/// `$PADBRIDGE_CONFIG`, else `$XDG_CONFIG_HOME/padbridge/config.toml`.
pub fn config_path() -> PathBuf {
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return PathBuf::from(path);
    }
    let mut path = dirs::config_dir().unwrap_or_else(|| {
        warn!("Could not determine config directory, using current directory");
        PathBuf::from(".")
    });
    path.push(CONFIG_DIR);
    path.push(CONFIG_FILE);
    path
}

impl DaemonConfig {
    pub async fn load() -> Result<Self, ConfigError> {
        Self::load_from(&config_path()).await
    }

    pub async fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let exists = tokio::fs::try_exists(path).await.map_err(|error| ConfigError::Read {
            path: path.to_path_buf(),
            error,
        })?;
        if !exists {
            warn!("Config file {} does not exist, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|error| ConfigError::Read {
                path: path.to_path_buf(),
                error,
            })?;
        let config: Self = toml::from_str(&content).map_err(|error| ConfigError::Parse {
            path: path.to_path_buf(),
            error,
        })?;
        config.validate()?;

        info!(
            "Loaded {} ({} profile(s), {} autoswitch rule(s), {} generic device(s))",
            path.display(),
            config.profiles.len(),
            config.autoswitch.len(),
            config.generic_devices.len()
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.daemon.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "daemon.tick_interval_ms",
                reason: "must be at least 1".into(),
            });
        }
        if self.daemon.read_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                key: "daemon.read_timeout_ms",
                reason: "must be at least 1".into(),
            });
        }
        if self.daemon.max_slots == 0 {
            return Err(ConfigError::Invalid {
                key: "daemon.max_slots",
                reason: "at least one slot is needed".into(),
            });
        }
        if self.control.client_queue == 0 {
            return Err(ConfigError::Invalid {
                key: "control.client_queue",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }

    /// Compile the `[[generic_devices]]` entries. Broken entries are
    /// returned separately so the rest still load.
    pub fn generic_devices(&self) -> (Vec<GenericDevice>, Vec<ConfigError>) {
        let mut devices = Vec::new();
        let mut errors = Vec::new();
        for config in &self.generic_devices {
            match GenericDevice::from_config(config) {
                Ok(device) => devices.push(device),
                Err(reason) => errors.push(ConfigError::GenericDevice {
                    name: config.name.clone(),
                    reason,
                }),
            }
        }
        (devices, errors)
    }
}
