//! Redundancy state controller.
//!
//! keepalived arbitrates which node is master; this controller only reacts
//! to the role it is told to take and brings interfaces, connection
//! tracking and the VPN/DHCP/password services in line with it:
//! - set → enable | disable (initial reconciliation)
//! - Backup/Fault → Master (notify_master)
//! - Master/Fault → Backup (notify_backup)
//! - any → Fault (notify_fault, heartbeat loss)

use crate::host::{CommandOutput, HostControl, ServiceAction};
use crate::inventory::{Inventory, NetworkInterface};
use crate::render::{
    ConntrackdModel, HeartbeatModel, KeepalivedModel, RenderedConfigFile, Renderer, Template,
};
use crate::settings::ControllerSettings;
use crate::types::{RedundancyConfig, RedundancyState};
use common::{Error, Result};
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

/// conntrackd flags run on takeover: commit the external cache, flush,
/// request a resync, then push a bulk update to the peer.
pub const CONNTRACKD_MASTER_SEQUENCE: [&str; 4] = ["-c", "-f", "-R", "-B"];

/// conntrackd flag putting the daemon in passive mode on backup
pub const CONNTRACKD_BACKUP_FLAG: &str = "-d";

/// conntrackd flag suspending synchronization on fault
pub const CONNTRACKD_FAULT_FLAG: &str = "-s";

/// What to do when a step fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Log and carry on with the next step
    Continue,
    /// Stop the operation and return the error
    Abort,
}

/// What `enable` did to a service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceOutcome {
    Unchanged,
    Started,
    Restarted,
}

/// Summary of one `enable` run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnableReport {
    pub keepalived: ServiceOutcome,
    pub conntrackd: ServiceOutcome,
    /// Rendered files written because their content changed
    pub files_written: usize,
}

/// Path taken by `set`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// Redundancy off; control plane torn down
    Disabled,
    /// No guest network; torn down, public interfaces raised if master
    PublicOnly,
    Enabled(EnableReport),
}

impl Reconciliation {
    /// What `enable` did, when it ran to completion
    pub fn report(&self) -> Option<&EnableReport> {
        match self {
            Reconciliation::Enabled(report) => Some(report),
            _ => None,
        }
    }
}

/// Drives one router node through its redundancy role
pub struct RedundancyController<H: HostControl> {
    host: H,
    settings: ControllerSettings,
    inventory: Inventory,
    renderer: Renderer,
}

impl<H: HostControl> RedundancyController<H> {
    pub fn new(host: H, settings: ControllerSettings, inventory: Inventory) -> Result<Self> {
        inventory.validate()?;
        Ok(Self {
            host,
            settings,
            inventory,
            renderer: Renderer::new()?,
        })
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    /// Current role as recorded in the snapshot
    pub fn state(&self, config: &RedundancyConfig) -> RedundancyState {
        config.state()
    }

    /// Initial reconciliation based on the redundancy flag.
    pub async fn set(&self, config: &RedundancyConfig) -> Result<Reconciliation> {
        if !config.is_redundant {
            info!(name = %config.name, "Redundancy disabled, tearing down control plane");
            self.disable(config).await?;
            return Ok(Reconciliation::Disabled);
        }

        self.enable(config).await
    }

    /// Render and install keepalived/conntrackd configuration and make sure
    /// both daemons run. Services are only bounced when their inputs changed.
    ///
    /// Without a guest network there is nothing to sync VRRP over: the
    /// control plane is torn down instead and a master keeps its public
    /// interfaces up.
    pub async fn enable(&self, config: &RedundancyConfig) -> Result<Reconciliation> {
        if !self.inventory.has_guest_network() {
            warn!(name = %config.name, "No guest network, redundancy not possible");
            self.disable(config).await?;
            if config.is_master {
                for iface in self.inventory.public_devices() {
                    self.link(iface, true).await?;
                }
            }
            return Ok(Reconciliation::PublicOnly);
        }

        info!(
            name = %config.name,
            router_id = config.router_id,
            priority = config.priority,
            "Enabling redundancy"
        );

        let router_dir = &self.settings.router_dir;
        self.apply(
            FailurePolicy::Abort,
            "create router directory",
            self.host.mkdir(router_dir, 0o755).await,
        )?;
        self.check(
            FailurePolicy::Continue,
            "mount router tmpfs",
            self.host.mount_tmpfs(router_dir).await,
        )?;

        let keepalived_model = KeepalivedModel::new(config, &self.inventory, &self.settings)?;
        let conntrackd_model = ConntrackdModel::new(&self.inventory, &self.settings)?;
        let heartbeat_model = HeartbeatModel::new(config, &self.inventory, &self.settings);

        let keepalived = self.renderer.render(
            Template::Keepalived,
            &keepalived_model,
            &self.settings.keepalived_conf,
        )?;
        let conntrackd = self.renderer.render(
            Template::Conntrackd,
            &conntrackd_model,
            &self.settings.conntrackd_conf,
        )?;
        let helpers = self
            .helper_files()
            .into_iter()
            .map(|(template, path)| self.renderer.render(template, &heartbeat_model, path))
            .collect::<Result<Vec<_>>>()?;

        let mut files_written = 0;
        for file in std::iter::once(&keepalived)
            .chain(std::iter::once(&conntrackd))
            .chain(helpers.iter())
        {
            let step = format!("write {}", file.path().display());
            if self.apply(FailurePolicy::Abort, &step, file.commit())? {
                files_written += 1;
            }
        }

        let conntrackd_outcome = self
            .ensure_running(
                &self.settings.services.conntrackd,
                &self.settings.services.conntrackd,
                conntrackd.changed(),
            )
            .await?;

        let helpers_changed = helpers.iter().any(RenderedConfigFile::changed);
        let keepalived_outcome = self
            .ensure_running(
                &self.settings.services.keepalived,
                &self.settings.keepalived_process,
                keepalived.changed() || helpers_changed,
            )
            .await?;

        let report = EnableReport {
            keepalived: keepalived_outcome,
            conntrackd: conntrackd_outcome,
            files_written,
        };
        info!(
            name = %config.name,
            files_written,
            keepalived = ?report.keepalived,
            conntrackd = ?report.conntrackd,
            "Redundancy enabled"
        );
        Ok(Reconciliation::Enabled(report))
    }

    /// Stop the daemons and remove everything `enable` installed.
    pub async fn disable(&self, config: &RedundancyConfig) -> Result<()> {
        info!(name = %config.name, "Disabling redundancy");

        let services = &self.settings.services;
        self.service(FailurePolicy::Continue, &services.conntrackd, ServiceAction::Stop)
            .await?;
        self.service(FailurePolicy::Continue, &services.keepalived, ServiceAction::Stop)
            .await?;

        let files = [
            self.settings.keepalived_conf.clone(),
            self.settings.conntrackd_conf.clone(),
        ]
        .into_iter()
        .chain(self.helper_files().into_iter().map(|(_, path)| path));

        for path in files {
            if let Err(e) = self.host.remove_file(&path).await {
                warn!(path = %path.display(), error = %e, "Failed to remove rendered file");
            }
        }

        self.check(
            FailurePolicy::Continue,
            "unmount router tmpfs",
            self.host.umount_tmpfs(&self.settings.router_dir).await,
        )?;
        Ok(())
    }

    /// Take over the virtual addresses.
    pub async fn set_master(&self, config: &mut RedundancyConfig) -> Result<()> {
        if !self.require_redundant(config, RedundancyState::Master) {
            return Ok(());
        }
        let _guard = self.settings.transition_lock().acquire().await?;
        info!(name = %config.name, from = %config.state(), "Transitioning to MASTER");

        for iface in self.inventory.public_devices() {
            self.link(iface, false).await?;
            self.link(iface, true).await?;
            self.gratuitous_arp(iface).await?;
        }
        self.announce_gateways().await?;

        for flag in CONNTRACKD_MASTER_SEQUENCE {
            self.conntrackd(flag).await?;
        }

        self.password_services(config, ServiceAction::Restart).await?;

        let services = &self.settings.services;
        for name in [&services.ipsec, &services.l2tp, &services.dhcp] {
            self.service(FailurePolicy::Continue, name, ServiceAction::Restart)
                .await?;
        }

        config.is_master = true;
        self.save(config)?;
        info!(name = %config.name, state = %config.state(), "Router is now MASTER");
        Ok(())
    }

    /// Give up the virtual addresses and stand by.
    pub async fn set_backup(&self, config: &mut RedundancyConfig) -> Result<()> {
        if !self.require_redundant(config, RedundancyState::Backup) {
            return Ok(());
        }
        let _guard = self.settings.transition_lock().acquire().await?;
        info!(name = %config.name, from = %config.state(), "Transitioning to BACKUP");

        for iface in self.inventory.public_devices() {
            self.link(iface, false).await?;
        }

        let services = &self.settings.services;
        for name in [&services.ipsec, &services.l2tp, &services.dhcp] {
            self.service(FailurePolicy::Continue, name, ServiceAction::Stop)
                .await?;
        }
        self.password_services(config, ServiceAction::Stop).await?;

        self.conntrackd(CONNTRACKD_BACKUP_FLAG).await?;

        config.is_master = false;
        // keepalived leaves FAULT through BACKUP
        config.fault_state = false;
        self.save(config)?;
        info!(name = %config.name, state = %config.state(), "Router is now BACKUP");
        Ok(())
    }

    /// Enter the degraded state.
    pub async fn set_fault(&self, config: &mut RedundancyConfig) -> Result<()> {
        if !self.require_redundant(config, RedundancyState::Fault) {
            return Ok(());
        }
        let _guard = self.settings.transition_lock().acquire().await?;
        warn!(name = %config.name, from = %config.state(), "Transitioning to FAULT");

        for iface in self.inventory.public_devices() {
            self.link(iface, false).await?;
        }

        self.conntrackd(CONNTRACKD_FAULT_FLAG).await?;

        self.password_services(config, ServiceAction::Stop).await?;
        let services = &self.settings.services;
        for name in [&services.ipsec, &services.l2tp, &services.dhcp] {
            self.service(FailurePolicy::Continue, name, ServiceAction::Stop)
                .await?;
        }

        config.fault_state = true;
        self.save(config)?;
        warn!(name = %config.name, state = %config.state(), "Router is now in FAULT");
        Ok(())
    }

    fn require_redundant(&self, config: &RedundancyConfig, target: RedundancyState) -> bool {
        if !config.is_redundant {
            error!(
                name = %config.name,
                target = %target,
                "Transition requested on a router without redundancy, ignoring"
            );
            return false;
        }
        true
    }

    fn helper_files(&self) -> [(Template, PathBuf); 4] {
        [
            (Template::Heartbeat, self.settings.heartbeat_script()),
            (Template::CheckHeartbeat, self.settings.check_heartbeat_script()),
            (Template::ArpingGateways, self.settings.arping_gateways_script()),
            (Template::HeartbeatCron, self.settings.cron_file.clone()),
        ]
    }

    /// Start a stopped service, restart a running one whose inputs changed.
    async fn ensure_running(
        &self,
        service: &str,
        process_pattern: &str,
        changed: bool,
    ) -> Result<ServiceOutcome> {
        if !self.host.process_running(process_pattern).await {
            self.service(FailurePolicy::Continue, service, ServiceAction::Start)
                .await?;
            return Ok(ServiceOutcome::Started);
        }

        if changed {
            self.service(FailurePolicy::Continue, service, ServiceAction::Restart)
                .await?;
            return Ok(ServiceOutcome::Restarted);
        }

        debug!(service, "Configuration unchanged, leaving service alone");
        Ok(ServiceOutcome::Unchanged)
    }

    async fn link(&self, iface: &NetworkInterface, up: bool) -> Result<()> {
        let state = if up { "up" } else { "down" };
        let args = ["link", "set", "dev", iface.device.as_str(), state].map(String::from);
        let step = format!("set {} {}", iface.device, state);
        self.check(
            FailurePolicy::Continue,
            &step,
            self.host.execute("ip", &args).await,
        )
    }

    async fn gratuitous_arp(&self, iface: &NetworkInterface) -> Result<()> {
        let args = [
            "-I".to_string(),
            iface.device.clone(),
            "-A".to_string(),
            "-c".to_string(),
            "1".to_string(),
            iface.ip.to_string(),
        ];
        let step = format!("announce {} on {}", iface.ip, iface.device);
        self.check(
            FailurePolicy::Continue,
            &step,
            self.host.execute("arping", &args).await,
        )
    }

    /// Run the router-local arping helper installed by `enable`.
    async fn announce_gateways(&self) -> Result<()> {
        let script = self.settings.arping_gateways_script();
        self.check(
            FailurePolicy::Continue,
            "announce public addresses to gateways",
            self.host.execute(&script.display().to_string(), &[]).await,
        )
    }

    async fn conntrackd(&self, flag: &str) -> Result<()> {
        let args = [
            "-C".to_string(),
            self.settings.conntrackd_conf.display().to_string(),
            flag.to_string(),
        ];
        let step = format!("conntrackd {}", flag);
        self.check(
            FailurePolicy::Continue,
            &step,
            self.host.execute("conntrackd", &args).await,
        )
    }

    async fn password_services(
        &self,
        config: &RedundancyConfig,
        action: ServiceAction,
    ) -> Result<()> {
        let gateways = self
            .inventory
            .vrrp_addresses(config.is_redundant)
            .filter_map(|binding| binding.gateway);

        let mut seen = BTreeSet::new();
        for gateway in gateways {
            if !seen.insert(gateway) {
                continue;
            }
            let name = self.settings.services.password_service(&gateway);
            self.service(FailurePolicy::Continue, &name, action).await?;
        }
        Ok(())
    }

    async fn service(&self, policy: FailurePolicy, name: &str, action: ServiceAction) -> Result<()> {
        let step = format!("{} {}", action, name);
        self.check(policy, &step, self.host.service(name, action).await)
    }

    fn save(&self, config: &RedundancyConfig) -> Result<()> {
        self.apply(
            FailurePolicy::Abort,
            "save router state",
            config.save(&self.settings.state_file),
        )
    }

    /// Judge a command by its exit status, then apply the failure policy.
    fn check(
        &self,
        policy: FailurePolicy,
        step: &str,
        result: Result<CommandOutput>,
    ) -> Result<()> {
        let result = result.and_then(|output| {
            if output.success() {
                Ok(())
            } else {
                Err(Error::command(format!(
                    "{} exited with {:?}: {}",
                    step,
                    output.code,
                    output.stderr.trim()
                )))
            }
        });
        self.apply(policy, step, result)
    }

    /// Apply the failure policy to the outcome of one step. A step skipped
    /// under `Continue` yields the default value.
    fn apply<T: Default>(
        &self,
        policy: FailurePolicy,
        step: &str,
        result: Result<T>,
    ) -> Result<T> {
        let failure = match result {
            Ok(value) => {
                debug!(step, "Step succeeded");
                return Ok(value);
            }
            Err(e) => e,
        };

        match policy {
            FailurePolicy::Continue => {
                warn!(step, error = %failure, "Step failed, continuing");
                Ok(T::default())
            }
            FailurePolicy::Abort => {
                error!(step, error = %failure, "Step failed, aborting");
                Err(failure)
            }
        }
    }
}
