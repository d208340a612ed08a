use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

pub const DEFAULT_MESH_SSID: &str = "commotionwireless.net";
pub const DEFAULT_MESH_BSSID: &str = "02:CA:FF:EE:BA:BE";

/// IPv4 addressing of an interface as captured or to be applied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Addressing {
    pub dhcp_enabled: bool,
    #[serde(default)]
    pub ips: Vec<Ipv4Addr>,
    #[serde(default)]
    pub subnet_masks: Vec<Ipv4Addr>,
    #[serde(default)]
    pub gateways: Vec<Ipv4Addr>,
}

impl Addressing {
    /// True when reapplying `self` would not change `current`.
    ///
    /// DHCP-managed addressing only compares the flag; leases are expected
    /// to differ between runs.
    pub fn matches(&self, current: &Addressing) -> bool {
        if self.dhcp_enabled || current.dhcp_enabled {
            return self.dhcp_enabled == current.dhcp_enabled;
        }
        self.ips == current.ips
            && self.subnet_masks == current.subnet_masks
            && self.gateways == current.gateways
    }
}

/// How the platform joined the network an interface is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionMode {
    Profile,
    TemporaryProfile,
    Auto,
    DiscoverySecure,
    DiscoveryUnsecure,
}

impl ConnectionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Profile => "profile",
            Self::TemporaryProfile => "temporary-profile",
            Self::Auto => "auto",
            Self::DiscoverySecure => "discovery-secure",
            Self::DiscoveryUnsecure => "discovery-unsecure",
        }
    }
}

/// Connection active on an interface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub profile_name: String,
    pub ssid: String,
    pub bssid: String,
    pub mode: ConnectionMode,
    /// Platform BSS type identifier, e.g. `dot11_BSS_type_infrastructure`.
    pub dot11_bss_type: String,
}

/// Wireless adapter joined with its addressing and prior connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interface {
    /// Stable id (lowercase MAC); survives renames between runs.
    pub id: String,
    pub name: String,
    pub description: String,
    pub mac: String,
    pub addressing: Addressing,
    /// Connection found when the inventory was taken, before any mutation.
    pub initial_connection: Option<ConnectionInfo>,
}

impl Interface {
    pub fn initial_bssid(&self) -> Option<&str> {
        self.initial_connection.as_ref().map(|c| c.bssid.as_str())
    }
}
