//! One agent invocation: load the snapshot and inventory, drive the
//! controller through the requested operation, persist.

use crate::cli::Command;
use crate::config::Config;
use anyhow::Context;
use redundancy::{
    ControllerSettings, HostControl, Inventory, Reconciliation, RedundancyConfig,
    RedundancyController, RedundancyState,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;

/// Snapshot summary printed by `status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub name: String,
    pub state: RedundancyState,
    pub is_redundant: bool,
    pub is_master: bool,
    pub fault_state: bool,
    pub router_id: u8,
    pub priority: u8,
}

impl From<&RedundancyConfig> for StatusReport {
    fn from(config: &RedundancyConfig) -> Self {
        Self {
            name: config.name.clone(),
            state: config.state(),
            is_redundant: config.is_redundant,
            is_master: config.is_master,
            fault_state: config.fault_state,
            router_id: config.router_id,
            priority: config.priority,
        }
    }
}

/// Result of one invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Status(StatusReport),
    Reconciled(Reconciliation),
    Transitioned(RedundancyState),
    Disabled,
}

pub struct Agent {
    settings: ControllerSettings,
    inventory_file: PathBuf,
}

impl Agent {
    /// Build from agent settings; CLI paths take precedence.
    pub fn new(config: &Config, state: Option<PathBuf>, inventory: Option<PathBuf>) -> Self {
        let mut settings = config.to_controller_settings();
        if let Some(state) = state {
            settings.state_file = state;
        }
        Self {
            settings,
            inventory_file: inventory.unwrap_or_else(|| config.paths.inventory_file.clone()),
        }
    }

    pub fn state_file(&self) -> &Path {
        &self.settings.state_file
    }

    pub fn inventory_file(&self) -> &Path {
        &self.inventory_file
    }

    fn load_state(&self) -> anyhow::Result<RedundancyConfig> {
        let path = self.state_file();
        RedundancyConfig::load(path)
            .with_context(|| format!("Failed to load router state from {}", path.display()))
    }

    pub async fn run<H: HostControl>(&self, host: H, command: Command) -> anyhow::Result<Outcome> {
        let mut config = self.load_state()?;

        if command == Command::Status {
            return Ok(Outcome::Status(StatusReport::from(&config)));
        }

        let inventory = Inventory::load(&self.inventory_file).with_context(|| {
            format!(
                "Failed to load inventory from {}",
                self.inventory_file.display()
            )
        })?;
        let controller = RedundancyController::new(host, self.settings.clone(), inventory)?;

        info!(command = %command, name = %config.name, state = %config.state(), "Running");

        let outcome = match command {
            Command::Set => Outcome::Reconciled(controller.set(&config).await?),
            Command::Master => {
                controller.set_master(&mut config).await?;
                Outcome::Transitioned(config.state())
            }
            Command::Backup => {
                controller.set_backup(&mut config).await?;
                Outcome::Transitioned(config.state())
            }
            Command::Fault => {
                controller.set_fault(&mut config).await?;
                Outcome::Transitioned(config.state())
            }
            Command::Disable => {
                controller.disable(&config).await?;
                Outcome::Disabled
            }
            Command::Status => Outcome::Status(StatusReport::from(&config)),
        };
        Ok(outcome)
    }
}
