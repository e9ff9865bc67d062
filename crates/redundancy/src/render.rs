//! Template rendering for keepalived, conntrackd and the heartbeat helpers.
//!
//! Each artifact is rendered from a typed model through an embedded tera
//! template. Rendering never touches the filesystem; comparing the result
//! with what is on disk is a plain byte comparison done by
//! [`RenderedConfigFile`].

use crate::inventory::Inventory;
use crate::settings::ControllerSettings;
use crate::types::RedundancyConfig;
use common::{Error, Result};
use serde::Serialize;
use std::fs;
use std::io::{self, Write};
use std::net::IpAddr;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tera::{Context, Tera};
use tracing::debug;

/// Embedded templates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template {
    Keepalived,
    Conntrackd,
    Heartbeat,
    CheckHeartbeat,
    ArpingGateways,
    HeartbeatCron,
}

impl Template {
    pub const ALL: [Template; 6] = [
        Template::Keepalived,
        Template::Conntrackd,
        Template::Heartbeat,
        Template::CheckHeartbeat,
        Template::ArpingGateways,
        Template::HeartbeatCron,
    ];

    /// Template name as registered with tera
    pub fn name(&self) -> &'static str {
        match self {
            Template::Keepalived => "keepalived.conf",
            Template::Conntrackd => "conntrackd.conf",
            Template::Heartbeat => "heartbeat.sh",
            Template::CheckHeartbeat => "check_heartbeat.sh",
            Template::ArpingGateways => "arping_gateways.sh",
            Template::HeartbeatCron => "heartbeat.cron",
        }
    }

    fn source(&self) -> &'static str {
        match self {
            Template::Keepalived => include_str!("../templates/keepalived.conf.tera"),
            Template::Conntrackd => include_str!("../templates/conntrackd.conf.tera"),
            Template::Heartbeat => include_str!("../templates/heartbeat.sh.tera"),
            Template::CheckHeartbeat => include_str!("../templates/check_heartbeat.sh.tera"),
            Template::ArpingGateways => include_str!("../templates/arping_gateways.sh.tera"),
            Template::HeartbeatCron => include_str!("../templates/heartbeat.cron.tera"),
        }
    }

    /// File mode of the installed artifact
    pub fn mode(&self) -> u32 {
        match self {
            Template::Heartbeat | Template::CheckHeartbeat | Template::ArpingGateways => 0o755,
            Template::Keepalived | Template::Conntrackd | Template::HeartbeatCron => 0o644,
        }
    }
}

/// One `virtual_ipaddress` entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VirtualIp {
    pub address: IpAddr,
    pub cidr: String,
    pub broadcast: Option<IpAddr>,
    pub device: String,
}

/// Data bound into keepalived.conf
#[derive(Debug, Clone, Serialize)]
pub struct KeepalivedModel {
    pub name: String,
    pub router_id: u8,
    pub priority: u8,
    pub advert_int: u32,
    /// Interface VRRP advertisements are exchanged on
    pub interface: String,
    pub password: String,
    pub virtual_ips: Vec<VirtualIp>,
    pub bin_path: String,
    pub heartbeat_interval: u32,
    pub notify_command: String,
}

impl KeepalivedModel {
    pub fn new(
        config: &RedundancyConfig,
        inventory: &Inventory,
        settings: &ControllerSettings,
    ) -> Result<Self> {
        let guest = inventory
            .guest_interface()
            .ok_or_else(|| Error::inventory("keepalived needs a guest interface"))?;

        let virtual_ips = inventory
            .public_addresses()
            .map(|binding| VirtualIp {
                address: binding.ip,
                cidr: binding.cidr.clone(),
                broadcast: binding.broadcast,
                device: binding.device.clone(),
            })
            .collect();

        Ok(Self {
            name: config.name.clone(),
            router_id: config.router_id,
            priority: config.priority,
            advert_int: config.advert_int,
            interface: guest.device.clone(),
            password: config.password.clone(),
            virtual_ips,
            bin_path: settings.router_dir.display().to_string(),
            heartbeat_interval: settings.heartbeat_interval,
            notify_command: settings.agent_command.clone(),
        })
    }
}

/// Data bound into conntrackd.conf
#[derive(Debug, Clone, Serialize)]
pub struct ConntrackdModel {
    pub guest_device: String,
    pub guest_ip: IpAddr,
    pub multicast_address: IpAddr,
    pub ignore_v4: Vec<IpAddr>,
    pub ignore_v6: Vec<IpAddr>,
}

impl ConntrackdModel {
    pub fn new(inventory: &Inventory, settings: &ControllerSettings) -> Result<Self> {
        let guest = inventory
            .guest_interface()
            .ok_or_else(|| Error::inventory("conntrackd needs a guest interface"))?;

        let (ignore_v4, ignore_v6): (Vec<IpAddr>, Vec<IpAddr>) = inventory
            .local_addresses()
            .into_iter()
            .partition(|ip| ip.is_ipv4());

        Ok(Self {
            guest_device: guest.device.clone(),
            guest_ip: guest.ip,
            multicast_address: settings.conntrack_multicast,
            ignore_v4,
            ignore_v6,
        })
    }
}

/// Address announced by arping_gateways.sh
#[derive(Debug, Clone, Serialize)]
pub struct ArpTarget {
    pub device: String,
    pub ip: IpAddr,
    /// Gateway when known, otherwise the address itself
    pub destination: IpAddr,
}

/// Data bound into the heartbeat scripts and cron entry
#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatModel {
    pub name: String,
    pub bin_path: String,
    pub heartbeat_interval: u32,
    pub max_strikes: u32,
    pub notify_command: String,
    pub keepalived_service: String,
    pub conntrackd_service: String,
    pub keepalived_process: String,
    pub arp_targets: Vec<ArpTarget>,
}

impl HeartbeatModel {
    pub fn new(
        config: &RedundancyConfig,
        inventory: &Inventory,
        settings: &ControllerSettings,
    ) -> Self {
        let arp_targets = inventory
            .public_addresses()
            .map(|binding| ArpTarget {
                device: binding.device.clone(),
                ip: binding.ip,
                destination: binding.gateway.unwrap_or(binding.ip),
            })
            .collect();

        Self {
            name: config.name.clone(),
            bin_path: settings.router_dir.display().to_string(),
            heartbeat_interval: settings.heartbeat_interval,
            max_strikes: settings.heartbeat_max_strikes,
            notify_command: settings.agent_command.clone(),
            keepalived_service: settings.services.keepalived.clone(),
            conntrackd_service: settings.services.conntrackd.clone(),
            keepalived_process: settings.keepalived_process.clone(),
            arp_targets,
        }
    }
}

/// A rendered artifact paired with what is currently on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedConfigFile {
    path: PathBuf,
    content: String,
    mode: u32,
    changed: bool,
}

impl RenderedConfigFile {
    /// Compare rendered content with the previous content, without I/O.
    ///
    /// A missing previous file always counts as changed.
    pub fn compare(
        path: impl Into<PathBuf>,
        content: String,
        mode: u32,
        previous: Option<&[u8]>,
    ) -> Self {
        let changed = previous != Some(content.as_bytes());
        Self {
            path: path.into(),
            content,
            mode,
            changed,
        }
    }

    /// Compare rendered content with the file currently at `path`.
    ///
    /// The previous file is compared byte for byte, so a corrupted one is
    /// simply replaced.
    pub fn against_disk(path: impl Into<PathBuf>, content: String, mode: u32) -> Result<Self> {
        let path = path.into();
        let previous = match fs::read(&path) {
            Ok(previous) => Some(previous),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        Ok(Self::compare(path, content, mode, previous.as_deref()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Whether the rendered content differs from the previous on-disk content
    pub fn changed(&self) -> bool {
        self.changed
    }

    /// Write the file if it changed. Returns whether anything was written.
    pub fn commit(&self) -> Result<bool> {
        if !self.changed {
            debug!(path = %self.path.display(), "Rendered file unchanged");
            return Ok(false);
        }

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut tmp_name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        tmp_name.push(".new");
        let tmp = self.path.with_file_name(tmp_name);

        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(self.content.as_bytes())?;
            file.set_permissions(fs::Permissions::from_mode(self.mode))?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;

        debug!(path = %self.path.display(), bytes = self.content.len(), "Wrote rendered file");
        Ok(true)
    }
}

/// Renders embedded templates from typed models
pub struct Renderer {
    tera: Tera,
}

impl Renderer {
    pub fn new() -> Result<Self> {
        let mut tera = Tera::default();
        tera.add_raw_templates(Template::ALL.iter().map(|t| (t.name(), t.source())))
            .map_err(Error::template)?;
        Ok(Self { tera })
    }

    /// Render a template to text.
    pub fn render_text<M: Serialize>(&self, template: Template, model: &M) -> Result<String> {
        let context = Context::from_serialize(model).map_err(Error::template)?;
        self.tera
            .render(template.name(), &context)
            .map_err(|e| Error::template(format!("{}: {:?}", template.name(), e)))
    }

    /// Render a template and compare it with the file at `path`.
    pub fn render<M: Serialize>(
        &self,
        template: Template,
        model: &M,
        path: impl Into<PathBuf>,
    ) -> Result<RenderedConfigFile> {
        let content = self.render_text(template, model)?;
        RenderedConfigFile::against_disk(path, content, template.mode())
    }
}

/// A `! <index>=<address>` marker recovered from keepalived.conf
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualIpEntry {
    pub index: usize,
    pub address: IpAddr,
}

/// Recover the annotated virtual addresses from rendered keepalived.conf.
pub fn parse_virtual_ips(content: &str) -> Vec<VirtualIpEntry> {
    content
        .lines()
        .filter_map(|line| line.trim().strip_prefix("! "))
        .filter_map(|marker| {
            let (index, address) = marker.split_once('=')?;
            Some(VirtualIpEntry {
                index: index.trim().parse().ok()?,
                address: address.trim().parse().ok()?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::{InterfaceRole, IpAddressBinding, NetworkInterface};

    fn inventory(public_ips: &[&str]) -> Inventory {
        let interfaces = vec![
            NetworkInterface {
                device: "eth0".to_string(),
                role: InterfaceRole::Guest,
                ip: "192.168.1.1".parse().unwrap(),
                netmask: "255.255.255.0".parse().unwrap(),
                gateway: None,
                broadcast: Some("192.168.1.255".parse().unwrap()),
                cidr: "192.168.1.0/24".to_string(),
            },
            NetworkInterface {
                device: "eth2".to_string(),
                role: InterfaceRole::Public,
                ip: public_ips[0].parse().unwrap(),
                netmask: "255.255.255.0".parse().unwrap(),
                gateway: Some("10.0.0.254".parse().unwrap()),
                broadcast: None,
                cidr: "10.0.0.0/24".to_string(),
            },
        ];
        let addresses = public_ips
            .iter()
            .map(|ip| IpAddressBinding {
                ip: ip.parse().unwrap(),
                device: "eth2".to_string(),
                role: InterfaceRole::Public,
                gateway: Some("10.0.0.254".parse().unwrap()),
                cidr: format!("{}/24", ip),
                broadcast: Some("10.0.0.255".parse().unwrap()),
                vrrp: false,
            })
            .collect();
        Inventory::new(interfaces, addresses).unwrap()
    }

    fn config() -> RedundancyConfig {
        RedundancyConfig {
            is_redundant: true,
            name: "r-7-VM".to_string(),
            priority: 90,
            router_id: 51,
            password: "abc123".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_all_templates_compile() {
        let renderer = Renderer::new().unwrap();
        for template in Template::ALL {
            assert!(renderer.tera.get_template_names().any(|n| n == template.name()));
        }
    }

    #[test]
    fn test_keepalived_virtual_ips_round_trip() {
        let renderer = Renderer::new().unwrap();
        let settings = ControllerSettings::default();
        let model = KeepalivedModel::new(&config(), &inventory(&["10.0.0.1", "10.0.0.2"]), &settings)
            .unwrap();

        let text = renderer.render_text(Template::Keepalived, &model).unwrap();
        assert!(text.contains("! 0=10.0.0.1"));
        assert!(text.contains("! 1=10.0.0.2"));
        assert!(text.contains("10.0.0.1/24 brd 10.0.0.255 dev eth2"));

        let parsed = parse_virtual_ips(&text);
        assert_eq!(
            parsed,
            vec![
                VirtualIpEntry { index: 0, address: "10.0.0.1".parse().unwrap() },
                VirtualIpEntry { index: 1, address: "10.0.0.2".parse().unwrap() },
            ]
        );
    }

    #[test]
    fn test_keepalived_parameters() {
        let renderer = Renderer::new().unwrap();
        let settings = ControllerSettings::default();
        let model = KeepalivedModel::new(&config(), &inventory(&["10.0.0.1"]), &settings).unwrap();
        let text = renderer.render_text(Template::Keepalived, &model).unwrap();

        assert!(text.contains("virtual_router_id 51"));
        assert!(text.contains("priority 90"));
        assert!(text.contains("interface eth0"));
        assert!(text.contains("auth_pass abc123"));
        assert!(text.contains("router_id r-7-VM"));
        assert!(text.contains("notify_master \"/usr/local/bin/redundancy-agent master\""));
    }

    #[test]
    fn test_rendering_is_deterministic() {
        let renderer = Renderer::new().unwrap();
        let settings = ControllerSettings::default();
        let inv = inventory(&["10.0.0.1", "10.0.0.2"]);

        let first = renderer
            .render_text(Template::Conntrackd, &ConntrackdModel::new(&inv, &settings).unwrap())
            .unwrap();
        let second = renderer
            .render_text(Template::Conntrackd, &ConntrackdModel::new(&inv, &settings).unwrap())
            .unwrap();

        assert_eq!(first, second);
        assert!(first.contains("Interface eth0"));
        assert!(first.contains("IPv4_interface 192.168.1.1"));
        assert!(first.contains("IPv4_address 10.0.0.2"));
    }

    #[test]
    fn test_heartbeat_scripts_reference_router_dir() {
        let renderer = Renderer::new().unwrap();
        let settings = ControllerSettings::default();
        let model = HeartbeatModel::new(&config(), &inventory(&["10.0.0.1"]), &settings);

        let heartbeat = renderer.render_text(Template::Heartbeat, &model).unwrap();
        assert!(heartbeat.contains("/ramdisk/rrouter/keepalived.ts"));

        let check = renderer.render_text(Template::CheckHeartbeat, &model).unwrap();
        assert!(check.contains("MAX_STRIKES=3"));
        assert!(check.contains("/usr/local/bin/redundancy-agent fault"));

        let arping = renderer.render_text(Template::ArpingGateways, &model).unwrap();
        assert!(arping.contains("arping -I eth2 -U -c 1 -s 10.0.0.1 10.0.0.254"));

        let cron = renderer.render_text(Template::HeartbeatCron, &model).unwrap();
        assert!(cron.contains("/ramdisk/rrouter/check_heartbeat.sh"));
    }

    #[test]
    fn test_missing_guest_interface_is_error() {
        let inv = Inventory::default();
        let settings = ControllerSettings::default();
        assert!(KeepalivedModel::new(&config(), &inv, &settings).is_err());
        assert!(ConntrackdModel::new(&inv, &settings).is_err());
    }

    #[test]
    fn test_compare_detects_changes() {
        let unchanged =
            RenderedConfigFile::compare("/x", "a\n".to_string(), 0o644, Some(b"a\n".as_slice()));
        assert!(!unchanged.changed());

        let changed =
            RenderedConfigFile::compare("/x", "b\n".to_string(), 0o644, Some(b"a\n".as_slice()));
        assert!(changed.changed());

        let missing = RenderedConfigFile::compare("/x", String::new(), 0o644, None);
        assert!(missing.changed());
    }

    #[test]
    fn test_commit_writes_only_when_changed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf/keepalived.conf");

        let first = RenderedConfigFile::against_disk(&path, "x = 1\n".to_string(), 0o644).unwrap();
        assert!(first.changed());
        assert!(first.commit().unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), "x = 1\n");

        let second = RenderedConfigFile::against_disk(&path, "x = 1\n".to_string(), 0o644).unwrap();
        assert!(!second.changed());
        assert!(!second.commit().unwrap());
    }

    #[test]
    fn test_non_utf8_file_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keepalived.conf");
        fs::write(&path, [0xff, 0xfe, 0x00, 0x41]).unwrap();

        let rendered = RenderedConfigFile::against_disk(&path, "x = 1\n".to_string(), 0o644).unwrap();
        assert!(rendered.changed());
        assert!(rendered.commit().unwrap());
        assert_eq!(fs::read_to_string(&path).unwrap(), "x = 1\n");
    }

    #[test]
    fn test_keepalived_without_password_skips_authentication() {
        let renderer = Renderer::new().unwrap();
        let settings = ControllerSettings::default();
        let config = RedundancyConfig {
            password: String::new(),
            ..config()
        };
        let model = KeepalivedModel::new(&config, &inventory(&["10.0.0.1"]), &settings).unwrap();
        let text = renderer.render_text(Template::Keepalived, &model).unwrap();

        assert!(!text.contains("authentication"));
        assert!(!text.contains("auth_pass"));
        assert!(text.contains("virtual_router_id 51"));
    }

    #[test]
    fn test_parse_ignores_unrelated_comments() {
        let text = "! Managed by redundancy-agent\n! 3=192.0.2.9\n!x=1\n";
        let parsed = parse_virtual_ips(text);
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].index, 3);
    }
}
