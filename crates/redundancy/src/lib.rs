//! Redundant virtual-router failover controller.
//!
//! Keeps a router node's local state in line with the role keepalived
//! assigns it in an active/standby pair.
//!
//! # Features
//!
//! - keepalived and conntrackd configuration rendered from typed models
//! - Service restarts only when rendered content changed
//! - MASTER / BACKUP / FAULT transitions serialized by a file lock
//! - Explicit per-step failure policy over typed command results
//!
//! # Example
//!
//! ```no_run
//! use redundancy::{ControllerSettings, Inventory, RedundancyConfig, RedundancyController, SystemHost};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = ControllerSettings::default();
//! let inventory = Inventory::load("/etc/redundancy/inventory.json")?;
//! let mut config = RedundancyConfig::load(&settings.state_file)?;
//!
//! let controller = RedundancyController::new(SystemHost::new(), settings, inventory)?;
//! controller.set_master(&mut config).await?;
//! # Ok(())
//! # }
//! ```

mod controller;
mod host;
mod inventory;
mod lock;
mod render;
mod settings;
mod types;

pub use controller::{
    CONNTRACKD_BACKUP_FLAG, CONNTRACKD_FAULT_FLAG, CONNTRACKD_MASTER_SEQUENCE, EnableReport,
    FailurePolicy, Reconciliation, RedundancyController, ServiceOutcome,
};
pub use host::{CommandOutput, HostControl, ServiceAction, SystemHost};
pub use inventory::{InterfaceRole, Inventory, IpAddressBinding, NetworkInterface};
pub use lock::{DEFAULT_LOCK_ATTEMPTS, DEFAULT_LOCK_BACKOFF, LockGuard, TransitionLock};
pub use render::{
    ArpTarget, ConntrackdModel, HeartbeatModel, KeepalivedModel, RenderedConfigFile, Renderer,
    Template, VirtualIp, VirtualIpEntry, parse_virtual_ips,
};
pub use settings::{ControllerSettings, ServiceNames};
pub use types::{DEFAULT_ADVERT_INT, RedundancyConfig, RedundancyState};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_types() {
        let config = RedundancyConfig::default();
        assert_eq!(config.router_id, 1);

        let state = RedundancyState::Disabled;
        assert_eq!(state.to_string(), "DISABLED");
    }
}
