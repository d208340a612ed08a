//! Ordering and display helpers over an inventory. No side effects.

use serde::Serialize;

use crate::error::{MeshError, Result};
use crate::inventory::{InventorySnapshot, Network};
use crate::model::Interface;

/// Strongest lead cell first. Stable for equal quality.
pub fn sort_by_quality(networks: &mut [Network]) {
    networks.sort_by(|a, b| b.quality().cmp(&a.quality()));
}

/// Whether `network` is what `iface` was associated with.
///
/// Only the lead cell is compared, so a group whose current cell is not the
/// first BSSID reads as not current.
pub fn is_current_network(network: &Network, iface: &Interface) -> bool {
    match (iface.initial_bssid(), network.bss_list.first()) {
        (Some(current), Some(lead)) => current.eq_ignore_ascii_case(&lead.bssid),
        _ => false,
    }
}

/// One line of the network listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkRow {
    /// 1-based; 0 is reserved for "create a new mesh".
    pub index: usize,
    pub interface: String,
    pub quality: u8,
    pub bssid: String,
    pub ssid: String,
    pub mesh: bool,
    pub current: bool,
}

pub fn network_rows(snapshot: &InventorySnapshot) -> Vec<NetworkRow> {
    let mut networks = snapshot.networks.clone();
    sort_by_quality(&mut networks);

    networks
        .iter()
        .enumerate()
        .map(|(idx, net)| NetworkRow {
            index: idx + 1,
            interface: net.interface_name.clone(),
            quality: net.quality(),
            bssid: net.bss_list.first().map(|b| b.bssid.clone()).unwrap_or_default(),
            ssid: net.ssid.clone(),
            mesh: net.is_mesh,
            current: snapshot
                .interface(&net.interface_id)
                .is_some_and(|iface| is_current_network(net, iface)),
        })
        .collect()
}

/// Interface named `name`, or the first one when no name is given.
pub fn choose_interface<'a>(snapshot: &'a InventorySnapshot, name: Option<&str>) -> Result<&'a Interface> {
    match name {
        Some(name) => snapshot
            .interface_by_name(name)
            .ok_or_else(|| MeshError::InterfaceNotFound {
                name: name.to_string(),
            }),
        None => snapshot.interfaces.first().ok_or(MeshError::NoInterfaces),
    }
}
