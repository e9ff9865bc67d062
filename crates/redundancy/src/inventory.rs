//! Network/IP inventory of the router.
//!
//! The inventory is produced outside this crate (by the config-merge
//! pipeline) and read here as JSON. It is never modified by the controller.

use common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::net::IpAddr;
use std::path::Path;

/// Semantic role of a NIC or address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterfaceRole {
    Guest,
    Control,
    Public,
}

/// One NIC on the router
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInterface {
    /// Device name (eth0, eth1, ...)
    pub device: String,

    pub role: InterfaceRole,

    /// Primary address of the interface
    pub ip: IpAddr,

    pub netmask: IpAddr,

    #[serde(default)]
    pub gateway: Option<IpAddr>,

    #[serde(default)]
    pub broadcast: Option<IpAddr>,

    /// Network in CIDR notation, e.g. "192.168.1.0/24"
    pub cidr: String,
}

impl NetworkInterface {
    pub fn is_guest(&self) -> bool {
        self.role == InterfaceRole::Guest
    }

    pub fn is_public(&self) -> bool {
        self.role == InterfaceRole::Public
    }
}

/// An address bound to one of the interfaces
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpAddressBinding {
    pub ip: IpAddr,

    /// Device the address lives on
    pub device: String,

    pub role: InterfaceRole,

    #[serde(default)]
    pub gateway: Option<IpAddr>,

    /// Address with prefix length, e.g. "203.0.113.5/24"
    pub cidr: String,

    #[serde(default)]
    pub broadcast: Option<IpAddr>,

    /// Forces VRRP management regardless of role
    #[serde(default)]
    pub vrrp: bool,
}

impl IpAddressBinding {
    pub fn is_public(&self) -> bool {
        self.role == InterfaceRole::Public
    }

    /// Whether ownership of this address follows the VRRP master.
    pub fn needs_vrrp(&self, is_redundant: bool) -> bool {
        is_redundant
            && (self.vrrp || matches!(self.role, InterfaceRole::Public | InterfaceRole::Guest))
    }
}

/// Read-only view of the router's interfaces and addresses
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    #[serde(default)]
    pub interfaces: Vec<NetworkInterface>,

    #[serde(default)]
    pub addresses: Vec<IpAddressBinding>,
}

impl Inventory {
    /// Build an inventory and check its invariants.
    pub fn new(
        interfaces: Vec<NetworkInterface>,
        addresses: Vec<IpAddressBinding>,
    ) -> Result<Self> {
        let inventory = Self {
            interfaces,
            addresses,
        };
        inventory.validate()?;
        Ok(inventory)
    }

    /// Load the inventory from a JSON document.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())?;
        let inventory: Inventory = serde_json::from_str(&contents)?;
        inventory.validate()?;
        Ok(inventory)
    }

    /// Every public address must sit on exactly one known interface.
    pub fn validate(&self) -> Result<()> {
        let mut devices: HashMap<&str, usize> = HashMap::new();
        for iface in &self.interfaces {
            *devices.entry(iface.device.as_str()).or_default() += 1;
        }

        for binding in self.addresses.iter().filter(|b| b.is_public()) {
            match devices.get(binding.device.as_str()) {
                Some(1) => {}
                Some(n) => {
                    return Err(Error::inventory(format!(
                        "public address {} maps to {} interfaces named {}",
                        binding.ip, n, binding.device
                    )));
                }
                None => {
                    return Err(Error::inventory(format!(
                        "public address {} is bound to unknown device {}",
                        binding.ip, binding.device
                    )));
                }
            }
        }

        Ok(())
    }

    /// First guest interface, if any. Redundancy needs one to sync over.
    pub fn guest_interface(&self) -> Option<&NetworkInterface> {
        self.interfaces.iter().find(|iface| iface.is_guest())
    }

    pub fn has_guest_network(&self) -> bool {
        self.guest_interface().is_some()
    }

    /// Public addresses in inventory order.
    pub fn public_addresses(&self) -> impl Iterator<Item = &IpAddressBinding> {
        self.addresses.iter().filter(|b| b.is_public())
    }

    /// Distinct devices carrying public addresses, in first-seen order.
    pub fn public_devices(&self) -> Vec<&NetworkInterface> {
        let mut seen = BTreeSet::new();
        let mut devices = Vec::new();

        let public_iface_devices = self
            .interfaces
            .iter()
            .filter(|iface| iface.is_public())
            .map(|iface| iface.device.as_str());
        let bound_devices = self.public_addresses().map(|b| b.device.as_str());

        for device in public_iface_devices.chain(bound_devices) {
            if !seen.insert(device) {
                continue;
            }
            if let Some(iface) = self.interfaces.iter().find(|i| i.device == device) {
                devices.push(iface);
            }
        }

        devices
    }

    /// Addresses whose ownership follows the master.
    pub fn vrrp_addresses(&self, is_redundant: bool) -> impl Iterator<Item = &IpAddressBinding> {
        self.addresses
            .iter()
            .filter(move |b| b.needs_vrrp(is_redundant))
    }

    /// Every address configured locally, used to keep conntrackd from
    /// syncing the router's own traffic.
    pub fn local_addresses(&self) -> Vec<IpAddr> {
        let mut ips: BTreeSet<IpAddr> = self.interfaces.iter().map(|i| i.ip).collect();
        ips.extend(self.addresses.iter().map(|b| b.ip));
        ips.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iface(device: &str, role: InterfaceRole, ip: &str, cidr: &str) -> NetworkInterface {
        NetworkInterface {
            device: device.to_string(),
            role,
            ip: ip.parse().unwrap(),
            netmask: "255.255.255.0".parse().unwrap(),
            gateway: None,
            broadcast: None,
            cidr: cidr.to_string(),
        }
    }

    fn public(ip: &str, device: &str) -> IpAddressBinding {
        IpAddressBinding {
            ip: ip.parse().unwrap(),
            device: device.to_string(),
            role: InterfaceRole::Public,
            gateway: Some("203.0.113.1".parse().unwrap()),
            cidr: format!("{}/24", ip),
            broadcast: None,
            vrrp: false,
        }
    }

    #[test]
    fn test_public_address_on_unknown_device_rejected() {
        let result = Inventory::new(
            vec![iface("eth0", InterfaceRole::Guest, "192.168.1.1", "192.168.1.0/24")],
            vec![public("203.0.113.5", "eth2")],
        );
        assert!(matches!(result, Err(Error::Inventory(_))));
    }

    #[test]
    fn test_public_address_on_duplicate_device_rejected() {
        let result = Inventory::new(
            vec![
                iface("eth2", InterfaceRole::Public, "203.0.113.5", "203.0.113.0/24"),
                iface("eth2", InterfaceRole::Public, "203.0.113.6", "203.0.113.0/24"),
            ],
            vec![public("203.0.113.5", "eth2")],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_public_devices_are_distinct() {
        let inventory = Inventory::new(
            vec![
                iface("eth0", InterfaceRole::Guest, "192.168.1.1", "192.168.1.0/24"),
                iface("eth2", InterfaceRole::Public, "203.0.113.5", "203.0.113.0/24"),
            ],
            vec![public("203.0.113.5", "eth2"), public("203.0.113.6", "eth2")],
        )
        .unwrap();

        let devices: Vec<_> = inventory
            .public_devices()
            .iter()
            .map(|i| i.device.clone())
            .collect();
        assert_eq!(devices, vec!["eth2"]);
        assert_eq!(inventory.guest_interface().unwrap().device, "eth0");
    }

    #[test]
    fn test_needs_vrrp_follows_redundancy() {
        let binding = public("203.0.113.5", "eth2");
        assert!(binding.needs_vrrp(true));
        assert!(!binding.needs_vrrp(false));

        let mut control = binding.clone();
        control.role = InterfaceRole::Control;
        assert!(!control.needs_vrrp(true));

        control.vrrp = true;
        assert!(control.needs_vrrp(true));
    }

    #[test]
    fn test_parse_inventory_json() {
        let json = r#"{
            "interfaces": [
                {"device": "eth0", "role": "guest", "ip": "192.168.1.1",
                 "netmask": "255.255.255.0", "cidr": "192.168.1.0/24"}
            ],
            "addresses": []
        }"#;
        let inventory: Inventory = serde_json::from_str(json).unwrap();
        assert!(inventory.has_guest_network());
        assert_eq!(inventory.public_addresses().count(), 0);
    }
}
