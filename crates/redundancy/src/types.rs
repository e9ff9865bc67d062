//! Redundancy data types: the persisted configuration snapshot and the
//! derived router state.

use common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Default keepalived advertisement interval (seconds)
pub const DEFAULT_ADVERT_INT: u32 = 1;

/// Role of this node in the redundant pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedundancyState {
    /// Redundancy is turned off for this router
    Disabled,
    /// Owns the virtual addresses
    Master,
    /// Standby, public interfaces down
    Backup,
    /// Cannot safely act as master or backup
    Fault,
}

impl RedundancyState {
    /// Derive the state from a configuration snapshot.
    pub fn from_config(config: &RedundancyConfig) -> Self {
        if !config.is_redundant {
            RedundancyState::Disabled
        } else if config.fault_state {
            RedundancyState::Fault
        } else if config.is_master {
            RedundancyState::Master
        } else {
            RedundancyState::Backup
        }
    }
}

impl std::fmt::Display for RedundancyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RedundancyState::Disabled => write!(f, "DISABLED"),
            RedundancyState::Master => write!(f, "MASTER"),
            RedundancyState::Backup => write!(f, "BACKUP"),
            RedundancyState::Fault => write!(f, "FAULT"),
        }
    }
}

/// Redundancy parameters handed to the router at boot, plus the flags the
/// transitions maintain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedundancyConfig {
    /// Whether this router is one half of a redundant pair
    #[serde(default)]
    pub is_redundant: bool,

    /// Whether this node currently holds the master role
    #[serde(default)]
    pub is_master: bool,

    /// Node name, used as the keepalived router_id
    pub name: String,

    /// VRRP priority (1-254)
    pub priority: u8,

    /// VRRP virtual router id (1-255)
    pub router_id: u8,

    /// Shared VRRP authentication secret
    #[serde(default)]
    pub password: String,

    /// Set when keepalived reported FAULT
    #[serde(default)]
    pub fault_state: bool,

    /// Advertisement interval in seconds
    #[serde(default = "default_advert_int")]
    pub advert_int: u32,
}

fn default_advert_int() -> u32 {
    DEFAULT_ADVERT_INT
}

impl Default for RedundancyConfig {
    fn default() -> Self {
        Self {
            is_redundant: false,
            is_master: false,
            name: String::from("r-router"),
            priority: 100,
            router_id: 1,
            password: String::new(),
            fault_state: false,
            advert_int: DEFAULT_ADVERT_INT,
        }
    }
}

impl RedundancyConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !self.is_redundant {
            return Ok(());
        }

        if self.router_id == 0 {
            return Err(Error::config("router_id must be between 1 and 255"));
        }

        if self.priority == 0 || self.priority == 255 {
            return Err(Error::config("priority must be between 1 and 254"));
        }

        if self.name.trim().is_empty() {
            return Err(Error::config("router name is required"));
        }

        if self.advert_int == 0 {
            return Err(Error::config("advert_int must be at least 1 second"));
        }

        Ok(())
    }

    /// Current state derived from the flags.
    pub fn state(&self) -> RedundancyState {
        RedundancyState::from_config(self)
    }

    /// Advertisement interval as a duration
    pub fn advert_interval(&self) -> Duration {
        Duration::from_secs(self.advert_int as u64)
    }

    /// Load the snapshot from a JSON state file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let config: RedundancyConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        debug!(path = %path.display(), state = %config.state(), "Loaded redundancy config");
        Ok(config)
    }

    /// Persist the snapshot. Writes a sibling temp file and renames it over
    /// the target so readers never see a partial document.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let tmp = tmp_path(path);

        let mut contents = serde_json::to_string_pretty(self)?;
        contents.push('\n');

        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(contents.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;

        debug!(path = %path.display(), state = %self.state(), "Saved redundancy config");
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn redundant() -> RedundancyConfig {
        RedundancyConfig {
            is_redundant: true,
            name: "r-4-VM".to_string(),
            priority: 90,
            router_id: 51,
            password: "s3cret".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_state_derivation() {
        let mut config = RedundancyConfig::default();
        assert_eq!(config.state(), RedundancyState::Disabled);

        config.is_redundant = true;
        assert_eq!(config.state(), RedundancyState::Backup);

        config.is_master = true;
        assert_eq!(config.state(), RedundancyState::Master);

        config.fault_state = true;
        assert_eq!(config.state(), RedundancyState::Fault);
        assert_eq!(config.state().to_string(), "FAULT");
    }

    #[test]
    fn test_config_validation() {
        let mut config = redundant();
        assert!(config.validate().is_ok());

        config.router_id = 0;
        assert!(config.validate().is_err());

        config.router_id = 51;
        config.priority = 255;
        assert!(config.validate().is_err());

        // Non-redundant configs are not checked
        config.is_redundant = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("redundancy.json");

        let config = redundant();
        config.save(&path).unwrap();

        let loaded = RedundancyConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert!(!dir.path().join("redundancy.json.tmp").exists());
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let json = r#"{"is_redundant": true, "name": "r-1", "priority": 100, "router_id": 7}"#;
        let config: RedundancyConfig = serde_json::from_str(json).unwrap();

        assert!(!config.is_master);
        assert!(!config.fault_state);
        assert_eq!(config.advert_int, DEFAULT_ADVERT_INT);
        assert_eq!(config.advert_interval(), Duration::from_secs(1));
    }
}
