//! Wireless interfaces and the networks they can see.
//!
//! An [`InventorySnapshot`] is taken once and threaded through planning and
//! apply. It is never refreshed in place; take a new one to see fresh state.

use regex::Regex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

use crate::error::{MeshError, Result};
use crate::model::Interface;
use crate::platform::{AddressOps, VisibleBss, WifiOps};

/// Reserved mesh BSSID, with or without the locally administered bit.
const MESH_BSSID_PATTERN: &str = r"(?i)^[01]2:CA:FF:EE:BA:BE$";

fn mesh_bssid_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(MESH_BSSID_PATTERN).ok()).as_ref()
}

pub fn is_mesh_bssid(bssid: &str) -> bool {
    mesh_bssid_re().is_some_and(|re| re.is_match(bssid.trim()))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BssEntry {
    pub bssid: String,
    pub quality: u8,
    pub dot11_bss_type: String,
}

/// One SSID seen on one interface, with every cell that carries it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Network {
    pub interface_id: String,
    pub interface_name: String,
    pub ssid: String,
    pub auth: String,
    pub cipher: String,
    /// Never empty.
    pub bss_list: Vec<BssEntry>,
    pub is_mesh: bool,
}

impl Network {
    /// Quality of the lead cell.
    pub fn quality(&self) -> u8 {
        self.bss_list.first().map(|b| b.quality).unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct NetworkKey {
    pub interface: String,
    pub ssid: String,
    pub bssid: String,
}

/// Everything needed to plan a connection to one cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkDetail {
    pub interface_id: String,
    pub interface_name: String,
    pub ssid: String,
    pub bssid: String,
    pub dot11_bss_type: String,
    pub auth: String,
    pub cipher: String,
    pub quality: u8,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct InventorySnapshot {
    pub interfaces: Vec<Interface>,
    pub networks: Vec<Network>,
    pub index: BTreeMap<NetworkKey, NetworkDetail>,
}

impl InventorySnapshot {
    pub fn refresh(wifi: &dyn WifiOps, addr: &dyn AddressOps) -> Result<Self> {
        let interfaces = collect_interfaces(wifi, addr)?;
        let (networks, index) = collect_networks(wifi, &interfaces)?;
        tracing::info!(
            target: "mesh",
            interfaces = interfaces.len(),
            networks = networks.len(),
            "inventory_collected"
        );
        Ok(Self {
            interfaces,
            networks,
            index,
        })
    }

    pub fn interface(&self, id: &str) -> Option<&Interface> {
        self.interfaces.iter().find(|i| i.id == id)
    }

    pub fn interface_by_name(&self, name: &str) -> Option<&Interface> {
        self.interfaces.iter().find(|i| i.name == name)
    }

    pub fn detail(&self, key: &NetworkKey) -> Option<&NetworkDetail> {
        self.index.get(key)
    }

    /// Visible cells broadcasting `ssid` from `bssid`, on any interface.
    ///
    /// Empty when nothing matches; the caller decides whether to create a
    /// new mesh instead.
    pub fn find_matching(&self, ssid: &str, bssid: &str) -> Vec<NetworkKey> {
        self.index
            .keys()
            .filter(|k| k.ssid == ssid && k.bssid.eq_ignore_ascii_case(bssid))
            .cloned()
            .collect()
    }
}

/// Lists wireless interfaces joined with their adapter configuration and the
/// connection they are on right now.
pub fn collect_interfaces(wifi: &dyn WifiOps, addr: &dyn AddressOps) -> Result<Vec<Interface>> {
    let wireless = wifi
        .list_interfaces()
        .map_err(|e| MeshError::platform("list_interfaces", e))?;
    let adapters = addr
        .list_adapters()
        .map_err(|e| MeshError::platform("list_adapters", e))?;
    let by_id: HashMap<String, _> = adapters
        .into_iter()
        .map(|a| (a.id.to_ascii_lowercase(), a))
        .collect();

    let mut interfaces = Vec::with_capacity(wireless.len());
    for w in wireless {
        let adapter = by_id
            .get(&w.id.to_ascii_lowercase())
            .ok_or_else(|| MeshError::InventoryMismatch {
                interface: w.name.clone(),
            })?;
        let initial_connection = wifi
            .current_connection(&w.name)
            .map_err(|e| MeshError::platform("current_connection", e))?;

        tracing::debug!(
            target: "wifi",
            iface = %w.name,
            connected = initial_connection.is_some(),
            dhcp = adapter.addressing.dhcp_enabled,
            "interface_collected"
        );
        interfaces.push(Interface {
            id: w.id,
            name: w.name,
            description: w.description,
            mac: adapter.mac.clone(),
            addressing: adapter.addressing.clone(),
            initial_connection,
        });
    }

    Ok(interfaces)
}

/// Scans every interface and groups the cells by SSID.
pub fn collect_networks(
    wifi: &dyn WifiOps,
    interfaces: &[Interface],
) -> Result<(Vec<Network>, BTreeMap<NetworkKey, NetworkDetail>)> {
    let mut networks = Vec::new();
    let mut index = BTreeMap::new();

    for iface in interfaces {
        let visible = wifi
            .list_visible_networks(&iface.name)
            .map_err(|e| MeshError::platform("list_visible_networks", e))?;
        let (mut grouped, details) = group_by_ssid(iface, visible);
        networks.append(&mut grouped);
        index.extend(details);
    }

    Ok((networks, index))
}

fn group_by_ssid(
    iface: &Interface,
    visible: Vec<VisibleBss>,
) -> (Vec<Network>, Vec<(NetworkKey, NetworkDetail)>) {
    let mut networks: Vec<Network> = Vec::new();
    let mut details = Vec::new();

    for bss in visible {
        let entry = BssEntry {
            bssid: bss.bssid.clone(),
            quality: bss.quality,
            dot11_bss_type: bss.dot11_bss_type.clone(),
        };
        let mesh = is_mesh_bssid(&bss.bssid);
        match networks.iter_mut().find(|n| n.ssid == bss.ssid) {
            Some(net) => {
                net.bss_list.push(entry);
                net.is_mesh |= mesh;
            }
            None => networks.push(Network {
                interface_id: iface.id.clone(),
                interface_name: iface.name.clone(),
                ssid: bss.ssid.clone(),
                auth: bss.auth.clone(),
                cipher: bss.cipher.clone(),
                bss_list: vec![entry],
                is_mesh: mesh,
            }),
        }

        details.push((
            NetworkKey {
                interface: iface.name.clone(),
                ssid: bss.ssid.clone(),
                bssid: bss.bssid.clone(),
            },
            NetworkDetail {
                interface_id: iface.id.clone(),
                interface_name: iface.name.clone(),
                ssid: bss.ssid,
                bssid: bss.bssid,
                dot11_bss_type: bss.dot11_bss_type,
                auth: bss.auth,
                cipher: bss.cipher,
                quality: bss.quality,
            },
        ));
    }

    (networks, details)
}
