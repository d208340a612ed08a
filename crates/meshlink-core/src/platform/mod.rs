//! Seams between the engine and the system services it drives.
//!
//! The orchestrator only sees these traits. `linux` holds the real
//! implementations on top of `meshlink-platform`; the tests module holds a
//! recording mock shared by the engine's unit tests.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use crate::model::{Addressing, ConnectionInfo, ConnectionMode};

#[cfg(target_os = "linux")]
pub mod linux;

/// Wireless adapter as listed by the wireless service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WirelessInterface {
    pub id: String,
    pub name: String,
    pub description: String,
}

/// One BSS seen in a scan, with the SSID's security metadata attached.
///
/// `auth`, `cipher` and `dot11_bss_type` carry platform identifiers
/// (`DOT11_AUTH_ALGO_RSNA_PSK`, `dot11_BSS_type_independent`, ...). They are
/// mapped to the profile vocabulary when a plan is built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisibleBss {
    pub ssid: String,
    pub bssid: String,
    pub quality: u8,
    pub auth: String,
    pub cipher: String,
    pub dot11_bss_type: String,
}

/// Adapter as listed by the addressing service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterConfig {
    pub id: String,
    pub name: String,
    pub mac: String,
    pub addressing: Addressing,
}

/// Association request handed to [`WifiOps::connect`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub mode: ConnectionMode,
    pub profile_name: String,
    pub ssid: String,
    /// Preferred cells, most preferred first.
    pub bssid_list: Vec<String>,
    pub dot11_bss_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DaemonHandle {
    pub pid: u32,
    pub interface: String,
    pub config_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunningDaemon {
    pub pid: i32,
    pub cmdline: String,
}

pub trait WifiOps: Send + Sync {
    fn list_interfaces(&self) -> Result<Vec<WirelessInterface>>;
    fn list_visible_networks(&self, iface: &str) -> Result<Vec<VisibleBss>>;
    fn current_connection(&self, iface: &str) -> Result<Option<ConnectionInfo>>;
    fn install_profile(&self, iface: &str, profile_path: &Path) -> Result<()>;
    fn connect(&self, iface: &str, request: &ConnectRequest) -> Result<()>;
    fn delete_profile(&self, name: &str, iface: &str) -> Result<()>;
}

pub trait AddressOps: Send + Sync {
    fn list_adapters(&self) -> Result<Vec<AdapterConfig>>;
    fn enable_dhcp(&self, iface: &str) -> Result<()>;
    fn set_static(&self, iface: &str, ips: &[Ipv4Addr], masks: &[Ipv4Addr]) -> Result<()>;
    fn set_gateways(&self, iface: &str, gateways: &[Ipv4Addr]) -> Result<()>;
}

pub trait DaemonLauncher: Send + Sync {
    /// Starts the routing daemon and returns without waiting for it.
    fn launch(&self, iface: &str, config_path: &Path) -> Result<DaemonHandle>;
    fn running(&self) -> Result<Vec<RunningDaemon>>;
}

/// Borrowed set of collaborators handed to the engine.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub wifi: &'a dyn WifiOps,
    pub addr: &'a dyn AddressOps,
    pub daemon: &'a dyn DaemonLauncher,
}
