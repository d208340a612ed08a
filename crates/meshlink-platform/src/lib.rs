//! # meshlink-platform
//!
//! Linux collaborators used by the mesh acquisition engine: a NetworkManager
//! D-Bus client for wireless devices and connection profiles, an rtnetlink
//! manager for IPv4 addresses and default gateways, and a launcher for the
//! routing daemon.
//!
//! Everything here is async except the process helpers. Callers that run
//! synchronously are expected to drive these futures on a shared runtime.

#[cfg(target_os = "linux")]
pub mod address;
pub mod error;
pub mod keyfile;
#[cfg(target_os = "linux")]
pub mod networkmanager;
#[cfg(target_os = "linux")]
pub mod process;

pub use error::{PlatformError, Result};
pub use keyfile::{escape_value, Keyfile};

#[cfg(target_os = "linux")]
pub use address::{AddressManager, LinkAddress, LinkInfo};
#[cfg(target_os = "linux")]
pub use networkmanager::{
    NetworkManagerClient, NmAccessPoint, NmActiveConnection, NmWifiDevice,
};
#[cfg(target_os = "linux")]
pub use process::{spawn_detached, ProcessInfo, ProcessManager};
