//! Controller settings: file locations, service names and lock policy.

use crate::lock::{DEFAULT_LOCK_ATTEMPTS, DEFAULT_LOCK_BACKOFF, TransitionLock};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Names of the init-system units the controller drives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceNames {
    pub keepalived: String,
    pub conntrackd: String,
    pub ipsec: String,
    pub l2tp: String,
    /// DHCP/DNS helper (dnsmasq)
    pub dhcp: String,
    /// Per-gateway password service; `{}` is replaced by the gateway address
    pub password: String,
}

impl Default for ServiceNames {
    fn default() -> Self {
        Self {
            keepalived: String::from("keepalived"),
            conntrackd: String::from("conntrackd"),
            ipsec: String::from("ipsec"),
            l2tp: String::from("xl2tpd"),
            dhcp: String::from("dnsmasq"),
            password: String::from("cloud-passwd-srvr@{}"),
        }
    }
}

impl ServiceNames {
    /// Unit name of the password service for a gateway
    pub fn password_service(&self, gateway: &IpAddr) -> String {
        self.password.replace("{}", &gateway.to_string())
    }
}

/// Controller settings
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    /// Persisted RedundancyConfig
    pub state_file: PathBuf,

    /// Rendered keepalived configuration
    pub keepalived_conf: PathBuf,

    /// Rendered conntrackd configuration
    pub conntrackd_conf: PathBuf,

    /// tmpfs-backed directory holding router-local heartbeat scripts
    pub router_dir: PathBuf,

    /// Cron entry running the heartbeat check
    pub cron_file: PathBuf,

    /// Lock file serializing transitions
    pub lock_file: PathBuf,

    /// Lock acquisition attempts
    pub lock_attempts: u32,

    /// Delay between lock attempts
    pub lock_backoff: Duration,

    /// Command keepalived runs on transitions (the agent binary)
    pub agent_command: String,

    /// keepalived vrrp_script interval (seconds)
    pub heartbeat_interval: u32,

    /// Consecutive stale heartbeats before the node declares FAULT
    pub heartbeat_max_strikes: u32,

    /// Multicast group conntrackd syncs over
    pub conntrack_multicast: IpAddr,

    /// Command-line pattern of the running VRRP process
    pub keepalived_process: String,

    pub services: ServiceNames,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            state_file: PathBuf::from("/etc/redundancy/state.json"),
            keepalived_conf: PathBuf::from("/etc/keepalived/keepalived.conf"),
            conntrackd_conf: PathBuf::from("/etc/conntrackd/conntrackd.conf"),
            router_dir: PathBuf::from("/ramdisk/rrouter"),
            cron_file: PathBuf::from("/etc/cron.d/heartbeat"),
            lock_file: PathBuf::from("/var/lock/redundancy-transition.lock"),
            lock_attempts: DEFAULT_LOCK_ATTEMPTS,
            lock_backoff: DEFAULT_LOCK_BACKOFF,
            agent_command: String::from("/usr/local/bin/redundancy-agent"),
            heartbeat_interval: 10,
            heartbeat_max_strikes: 3,
            conntrack_multicast: IpAddr::from([225, 0, 0, 50]),
            keepalived_process: String::from("keepalived --vrrp"),
            services: ServiceNames::default(),
        }
    }
}

impl ControllerSettings {
    /// Transition lock described by these settings
    pub fn transition_lock(&self) -> TransitionLock {
        TransitionLock::new(&self.lock_file, self.lock_attempts, self.lock_backoff)
    }

    /// Router-local copy of the heartbeat script
    pub fn heartbeat_script(&self) -> PathBuf {
        self.router_dir.join("heartbeat.sh")
    }

    pub fn check_heartbeat_script(&self) -> PathBuf {
        self.router_dir.join("check_heartbeat.sh")
    }

    pub fn arping_gateways_script(&self) -> PathBuf {
        self.router_dir.join("arping_gateways.sh")
    }

    /// Relocate every path under `root`; used by tests and dry runs.
    pub fn rooted_at(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            state_file: root.join("state.json"),
            keepalived_conf: root.join("etc/keepalived/keepalived.conf"),
            conntrackd_conf: root.join("etc/conntrackd/conntrackd.conf"),
            router_dir: root.join("ramdisk/rrouter"),
            cron_file: root.join("etc/cron.d/heartbeat"),
            lock_file: root.join("transition.lock"),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_service_name() {
        let names = ServiceNames::default();
        let gw: IpAddr = "10.1.1.1".parse().unwrap();
        assert_eq!(names.password_service(&gw), "cloud-passwd-srvr@10.1.1.1");
    }

    #[test]
    fn test_rooted_paths() {
        let settings = ControllerSettings::rooted_at("/tmp/r");
        assert_eq!(
            settings.keepalived_conf,
            PathBuf::from("/tmp/r/etc/keepalived/keepalived.conf")
        );
        assert_eq!(
            settings.heartbeat_script(),
            PathBuf::from("/tmp/r/ramdisk/rrouter/heartbeat.sh")
        );
        assert_eq!(settings.lock_attempts, DEFAULT_LOCK_ATTEMPTS);
    }
}
