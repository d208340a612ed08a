//! NetworkManager, rtnetlink and process backed collaborators.

use anyhow::{bail, Context, Result};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use meshlink_platform::{
    spawn_detached, AddressManager, Keyfile, LinkInfo, NetworkManagerClient, NmAccessPoint,
    NmActiveConnection, ProcessManager,
};

use super::{
    AdapterConfig, AddressOps, ConnectRequest, DaemonHandle, DaemonLauncher, RunningDaemon,
    VisibleBss, WifiOps, WirelessInterface,
};
use crate::model::{Addressing, ConnectionInfo, ConnectionMode};
use crate::runtime::block_on;

const NM_802_11_MODE_ADHOC: u32 = 1;
const NM_802_11_MODE_INFRA: u32 = 2;

const AP_FLAGS_PRIVACY: u32 = 0x1;
const AP_SEC_PAIR_WEP40: u32 = 0x1;
const AP_SEC_PAIR_WEP104: u32 = 0x2;
const AP_SEC_PAIR_TKIP: u32 = 0x4;
const AP_SEC_PAIR_CCMP: u32 = 0x8;
const AP_SEC_KEY_MGMT_PSK: u32 = 0x100;
const AP_SEC_KEY_MGMT_802_1X: u32 = 0x200;

/// Wireless capability backed by NetworkManager over D-Bus.
pub struct NmWifiOps;

impl WifiOps for NmWifiOps {
    fn list_interfaces(&self) -> Result<Vec<WirelessInterface>> {
        let devices = block_on(async {
            let client = NetworkManagerClient::new().await?;
            client.wifi_devices().await
        })?;

        Ok(devices
            .into_iter()
            .map(|d| WirelessInterface {
                id: d.hw_address,
                description: if d.driver.is_empty() {
                    d.interface.clone()
                } else {
                    d.driver
                },
                name: d.interface,
            })
            .collect())
    }

    fn list_visible_networks(&self, iface: &str) -> Result<Vec<VisibleBss>> {
        let aps = block_on(async {
            let client = NetworkManagerClient::new().await?;
            client.access_points(iface, true).await
        })?;

        Ok(aps
            .into_iter()
            .filter(|ap| !ap.ssid.is_empty())
            .map(|ap| {
                let (auth, cipher) = dot11_security(ap.flags, ap.wpa_flags, ap.rsn_flags);
                VisibleBss {
                    dot11_bss_type: dot11_bss_type(ap.mode).to_string(),
                    bssid: ap.bssid.to_uppercase(),
                    quality: ap.strength.min(100),
                    ssid: ap.ssid,
                    auth: auth.to_string(),
                    cipher: cipher.to_string(),
                }
            })
            .collect())
    }

    fn current_connection(&self, iface: &str) -> Result<Option<ConnectionInfo>> {
        let active = block_on(async {
            let client = NetworkManagerClient::new().await?;
            client.active_connection(iface).await
        })?;
        Ok(active.map(connection_info))
    }

    fn install_profile(&self, iface: &str, profile_path: &Path) -> Result<()> {
        let text = std::fs::read_to_string(profile_path)
            .with_context(|| format!("reading profile {}", profile_path.display()))?;
        let keyfile = Keyfile::parse(&text)?;
        let id = keyfile
            .id()
            .map(str::to_string)
            .with_context(|| format!("profile {} has no connection id", profile_path.display()))?;
        let settings = keyfile.to_settings()?;

        block_on(async {
            let client = NetworkManagerClient::new().await?;
            // A profile left over from an interrupted run would shadow this one.
            if client.delete_connection(&id, Some(iface)).await? {
                tracing::info!(target: "wifi", iface = %iface, profile = %id, "stale_profile_replaced");
            }
            client.add_connection(settings).await
        })?;
        Ok(())
    }

    fn connect(&self, iface: &str, request: &ConnectRequest) -> Result<()> {
        block_on(async {
            let client = NetworkManagerClient::new().await?;
            client
                .activate_connection(iface, &request.profile_name, &request.bssid_list)
                .await
        })
    }

    fn delete_profile(&self, name: &str, iface: &str) -> Result<()> {
        let deleted = block_on(async {
            let client = NetworkManagerClient::new().await?;
            client.delete_connection(name, Some(iface)).await
        })?;
        if !deleted {
            tracing::debug!(target: "wifi", iface = %iface, profile = %name, "profile_already_absent");
        }
        Ok(())
    }
}

/// Addressing capability backed by rtnetlink.
pub struct NetlinkAddressOps;

impl AddressOps for NetlinkAddressOps {
    fn list_adapters(&self) -> Result<Vec<AdapterConfig>> {
        let links = block_on(async {
            let mgr = AddressManager::new()?;
            mgr.list_links().await
        })?;

        Ok(links
            .into_iter()
            .filter(|l| !l.mac.is_empty() && l.name != "lo")
            .map(adapter_config)
            .collect())
    }

    fn enable_dhcp(&self, iface: &str) -> Result<()> {
        block_on(async {
            let mgr = AddressManager::new()?;
            mgr.remove_permanent_ipv4(iface).await
        })?;
        Ok(())
    }

    fn set_static(&self, iface: &str, ips: &[Ipv4Addr], masks: &[Ipv4Addr]) -> Result<()> {
        if ips.len() != masks.len() {
            bail!(
                "{} addresses but {} netmasks for {}",
                ips.len(),
                masks.len(),
                iface
            );
        }
        let mut pairs = Vec::with_capacity(ips.len());
        for (ip, mask) in ips.iter().zip(masks) {
            let prefix = ipnet::ipv4_mask_to_prefix(*mask)
                .with_context(|| format!("netmask {} is not contiguous", mask))?;
            pairs.push((*ip, prefix));
        }

        block_on(async {
            let mgr = AddressManager::new()?;
            mgr.replace_ipv4_addresses(iface, &pairs).await
        })?;
        Ok(())
    }

    fn set_gateways(&self, iface: &str, gateways: &[Ipv4Addr]) -> Result<()> {
        block_on(async {
            let mgr = AddressManager::new()?;
            mgr.replace_default_gateways(iface, gateways).await
        })?;
        Ok(())
    }
}

/// Routing daemon launched as `<daemon> -i <iface> -f <conf>`.
pub struct OlsrdLauncher {
    daemon_path: PathBuf,
}

impl OlsrdLauncher {
    pub fn new(daemon_path: PathBuf) -> Self {
        Self { daemon_path }
    }

    fn process_name(&self) -> String {
        self.daemon_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "olsrd".to_string())
    }
}

impl DaemonLauncher for OlsrdLauncher {
    fn launch(&self, iface: &str, config_path: &Path) -> Result<DaemonHandle> {
        let args = vec![
            "-i".to_string(),
            iface.to_string(),
            "-f".to_string(),
            config_path.display().to_string(),
        ];
        let pid = spawn_detached(&self.daemon_path, &args)?;
        Ok(DaemonHandle {
            pid,
            interface: iface.to_string(),
            config_path: config_path.to_path_buf(),
        })
    }

    fn running(&self) -> Result<Vec<RunningDaemon>> {
        let found = ProcessManager::new().find_by_name(&self.process_name())?;
        Ok(found
            .into_iter()
            .map(|p| RunningDaemon {
                pid: p.pid,
                cmdline: p.cmdline,
            })
            .collect())
    }
}

fn adapter_config(link: LinkInfo) -> AdapterConfig {
    let dhcp_enabled = link.addresses.iter().any(|a| a.dynamic);
    let mut addressing = Addressing {
        dhcp_enabled,
        gateways: link.gateways,
        ..Default::default()
    };
    for addr in &link.addresses {
        let mask = ipnet::Ipv4Net::new(addr.address, addr.prefix_len)
            .map(|net| net.netmask())
            .unwrap_or(Ipv4Addr::BROADCAST);
        addressing.ips.push(addr.address);
        addressing.subnet_masks.push(mask);
    }

    AdapterConfig {
        id: link.mac.clone(),
        name: link.name,
        mac: link.mac,
        addressing,
    }
}

fn connection_info(active: NmActiveConnection) -> ConnectionInfo {
    let mode = if active.temporary {
        ConnectionMode::TemporaryProfile
    } else if active.autoconnect {
        ConnectionMode::Auto
    } else {
        ConnectionMode::Profile
    };
    let (ssid, bssid, bss_type) = match &active.access_point {
        Some(NmAccessPoint {
            ssid, bssid, mode, ..
        }) => (ssid.clone(), bssid.to_uppercase(), dot11_bss_type(*mode)),
        None => (String::new(), String::new(), "dot11_BSS_type_any"),
    };

    ConnectionInfo {
        profile_name: active.id,
        ssid,
        bssid,
        mode,
        dot11_bss_type: bss_type.to_string(),
    }
}

fn dot11_bss_type(mode: u32) -> &'static str {
    match mode {
        NM_802_11_MODE_ADHOC => "dot11_BSS_type_independent",
        NM_802_11_MODE_INFRA => "dot11_BSS_type_infrastructure",
        _ => "dot11_BSS_type_any",
    }
}

/// Translates NetworkManager AP flags into 802.11 auth/cipher identifiers.
///
/// Combinations without a counterpart (SAE-only, OWE, no pairwise cipher)
/// come back as identifiers the plan builder does not map, so they are
/// rejected there.
fn dot11_security(flags: u32, wpa: u32, rsn: u32) -> (&'static str, &'static str) {
    let pair_cipher = |sec: u32| {
        if sec & AP_SEC_PAIR_CCMP != 0 {
            "DOT11_CIPHER_ALGO_CCMP"
        } else if sec & AP_SEC_PAIR_TKIP != 0 {
            "DOT11_CIPHER_ALGO_TKIP"
        } else if sec & AP_SEC_PAIR_WEP104 != 0 {
            "DOT11_CIPHER_ALGO_WEP104"
        } else if sec & AP_SEC_PAIR_WEP40 != 0 {
            "DOT11_CIPHER_ALGO_WEP40"
        } else {
            "DOT11_CIPHER_ALGO_UNKNOWN"
        }
    };

    if rsn != 0 {
        let auth = if rsn & AP_SEC_KEY_MGMT_802_1X != 0 {
            "DOT11_AUTH_ALGO_RSNA"
        } else if rsn & AP_SEC_KEY_MGMT_PSK != 0 {
            "DOT11_AUTH_ALGO_RSNA_PSK"
        } else {
            "DOT11_AUTH_ALGO_WPA3_SAE"
        };
        return (auth, pair_cipher(rsn));
    }
    if wpa != 0 {
        let auth = if wpa & AP_SEC_KEY_MGMT_802_1X != 0 {
            "DOT11_AUTH_ALGO_WPA"
        } else {
            "DOT11_AUTH_ALGO_WPA_PSK"
        };
        return (auth, pair_cipher(wpa));
    }
    if flags & AP_FLAGS_PRIVACY != 0 {
        return ("DOT11_AUTH_ALGO_80211_OPEN", "DOT11_CIPHER_ALGO_WEP");
    }
    ("DOT11_AUTH_ALGO_80211_OPEN", "DOT11_CIPHER_ALGO_NONE")
}
