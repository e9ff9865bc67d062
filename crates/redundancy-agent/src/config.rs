//! Configuration loading and validation for the redundancy agent

use redundancy::{ControllerSettings, ServiceNames};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use validator::{Validate, ValidationError};

/// Configuration error types
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found in search paths")]
    FileNotFound,

    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(#[from] validator::ValidationErrors),
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub paths: PathSettings,

    #[serde(default)]
    pub lock: LockSettings,

    #[serde(default)]
    pub services: ServiceSettings,

    #[serde(default)]
    pub heartbeat: HeartbeatSettings,

    #[serde(default)]
    pub keepalived: KeepalivedSettings,

    #[serde(default)]
    pub conntrackd: ConntrackdSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

impl Validate for Config {
    fn validate(&self) -> Result<(), validator::ValidationErrors> {
        self.paths.validate()?;
        self.lock.validate()?;
        self.services.validate()?;
        self.heartbeat.validate()?;
        self.keepalived.validate()?;
        self.conntrackd.validate()?;
        Ok(())
    }
}

/// File locations
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct PathSettings {
    #[validate(custom = "validate_absolute_path")]
    pub state_file: PathBuf,

    #[validate(custom = "validate_absolute_path")]
    pub inventory_file: PathBuf,

    #[validate(custom = "validate_absolute_path")]
    pub keepalived_conf: PathBuf,

    #[validate(custom = "validate_absolute_path")]
    pub conntrackd_conf: PathBuf,

    #[validate(custom = "validate_absolute_path")]
    pub router_dir: PathBuf,

    #[validate(custom = "validate_absolute_path")]
    pub cron_file: PathBuf,

    #[validate(custom = "validate_absolute_path")]
    pub lock_file: PathBuf,
}

/// Transition lock acquisition
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LockSettings {
    #[validate(range(min = 1, max = 600))]
    pub attempts: u32,

    #[serde(with = "humantime_serde")]
    #[validate(custom = "validate_lock_backoff")]
    pub backoff: Duration,
}

/// Service unit names
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ServiceSettings {
    #[validate(length(min = 1))]
    pub keepalived: String,

    #[validate(length(min = 1))]
    pub conntrackd: String,

    #[validate(length(min = 1))]
    pub ipsec: String,

    #[validate(length(min = 1))]
    pub l2tp: String,

    #[validate(length(min = 1))]
    pub dhcp: String,

    /// `{}` is replaced by the gateway address
    #[validate(custom = "validate_password_unit")]
    pub password: String,
}

/// Heartbeat checking
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct HeartbeatSettings {
    /// Seconds between keepalived heartbeat script runs
    #[validate(range(min = 1, max = 3600))]
    pub interval: u32,

    #[validate(range(min = 1, max = 100))]
    pub max_strikes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct KeepalivedSettings {
    /// Command line keepalived's VRRP process runs with
    #[validate(length(min = 1))]
    pub process: String,

    /// Command the notify hooks invoke
    #[validate(length(min = 1))]
    pub agent_command: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ConntrackdSettings {
    #[validate(custom = "validate_multicast")]
    pub multicast: IpAddr,
}

/// Logging settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSettings {
    pub level: Option<String>,
    pub format: Option<String>,
}

impl LoggingSettings {
    pub fn level(&self) -> &str {
        self.level.as_deref().unwrap_or("info")
    }

    pub fn is_json(&self) -> bool {
        self.format.as_deref() == Some("json")
    }
}

// Default implementations

impl Default for PathSettings {
    fn default() -> Self {
        let controller = ControllerSettings::default();
        Self {
            state_file: controller.state_file,
            inventory_file: PathBuf::from("/etc/redundancy/inventory.json"),
            keepalived_conf: controller.keepalived_conf,
            conntrackd_conf: controller.conntrackd_conf,
            router_dir: controller.router_dir,
            cron_file: controller.cron_file,
            lock_file: controller.lock_file,
        }
    }
}

impl Default for LockSettings {
    fn default() -> Self {
        let controller = ControllerSettings::default();
        Self {
            attempts: controller.lock_attempts,
            backoff: controller.lock_backoff,
        }
    }
}

impl Default for ServiceSettings {
    fn default() -> Self {
        let names = ServiceNames::default();
        Self {
            keepalived: names.keepalived,
            conntrackd: names.conntrackd,
            ipsec: names.ipsec,
            l2tp: names.l2tp,
            dhcp: names.dhcp,
            password: names.password,
        }
    }
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        let controller = ControllerSettings::default();
        Self {
            interval: controller.heartbeat_interval,
            max_strikes: controller.heartbeat_max_strikes,
        }
    }
}

impl Default for KeepalivedSettings {
    fn default() -> Self {
        let controller = ControllerSettings::default();
        Self {
            process: controller.keepalived_process,
            agent_command: controller.agent_command,
        }
    }
}

impl Default for ConntrackdSettings {
    fn default() -> Self {
        Self {
            multicast: ControllerSettings::default().conntrack_multicast,
        }
    }
}

// Custom validators

fn validate_absolute_path(path: &Path) -> Result<(), ValidationError> {
    if path.as_os_str().is_empty() {
        return Err(ValidationError::new("path_empty"));
    }
    if !path.is_absolute() {
        return Err(ValidationError::new("path_not_absolute"));
    }
    Ok(())
}

fn validate_lock_backoff(backoff: &Duration) -> Result<(), ValidationError> {
    let millis = backoff.as_millis();
    if millis < 1 || millis > 60_000 {
        return Err(ValidationError::new("lock_backoff_out_of_range"));
    }
    Ok(())
}

fn validate_password_unit(unit: &str) -> Result<(), ValidationError> {
    if !unit.contains("{}") {
        return Err(ValidationError::new("password_unit_missing_placeholder"));
    }
    Ok(())
}

fn validate_multicast(addr: &IpAddr) -> Result<(), ValidationError> {
    if !addr.is_multicast() {
        return Err(ValidationError::new("conntrackd_address_not_multicast"));
    }
    Ok(())
}

// Configuration loading implementation

impl Config {
    /// Load configuration from default search paths
    pub fn load() -> Result<Self, ConfigError> {
        match Self::find_config_file() {
            Some(path) => {
                tracing::info!("Loading configuration from: {}", path.display());
                Self::load_from_file(&path)
            }
            None => {
                tracing::info!("No configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(ConfigError::FileNotFound);
        }
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        let mut paths = vec![PathBuf::from("/etc/redundancy/agent.yaml")];

        if let Some(home_path) = Self::home_config_path() {
            paths.push(home_path);
        }

        paths.push(PathBuf::from("./agent.yaml"));

        paths.into_iter().find(|p| p.is_file())
    }

    /// Get home directory config path
    fn home_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".config/redundancy/agent.yaml"))
    }

    /// Convert to the controller's settings
    pub fn to_controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            state_file: self.paths.state_file.clone(),
            keepalived_conf: self.paths.keepalived_conf.clone(),
            conntrackd_conf: self.paths.conntrackd_conf.clone(),
            router_dir: self.paths.router_dir.clone(),
            cron_file: self.paths.cron_file.clone(),
            lock_file: self.paths.lock_file.clone(),
            lock_attempts: self.lock.attempts,
            lock_backoff: self.lock.backoff,
            agent_command: self.keepalived.agent_command.clone(),
            heartbeat_interval: self.heartbeat.interval,
            heartbeat_max_strikes: self.heartbeat.max_strikes,
            conntrack_multicast: self.conntrackd.multicast,
            keepalived_process: self.keepalived.process.clone(),
            services: ServiceNames {
                keepalived: self.services.keepalived.clone(),
                conntrackd: self.services.conntrackd.clone(),
                ipsec: self.services.ipsec.clone(),
                l2tp: self.services.l2tp.clone(),
                dhcp: self.services.dhcp.clone(),
                password: self.services.password.clone(),
            },
        }
    }
}
