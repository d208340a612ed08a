use anyhow::{Context, Result};
use std::collections::HashMap;
use zbus::zvariant::{ObjectPath, OwnedObjectPath, OwnedValue, Value};
use zbus::Connection;

use crate::error::PlatformError;
use crate::keyfile::ConnectionSettings;

const NM_BUS: &str = "org.freedesktop.NetworkManager";
const NM_PATH: &str = "/org/freedesktop/NetworkManager";
const NM_SETTINGS_PATH: &str = "/org/freedesktop/NetworkManager/Settings";

const NM_DEVICE_TYPE_WIFI: u32 = 2;
const NM_SETTINGS_FLAG_UNSAVED: u32 = 0x01;
const NM_SETTINGS_FLAG_VOLATILE: u32 = 0x04;

type SettingsMap = HashMap<String, HashMap<String, OwnedValue>>;

/// Wi-Fi capable device as NetworkManager reports it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NmWifiDevice {
    pub interface: String,
    pub driver: String,
    pub hw_address: String,
}

/// Access point seen by a Wi-Fi device.
///
/// `mode` is the raw `NM80211Mode` (1 ad-hoc, 2 infrastructure) and the flag
/// fields are the raw `NM80211ApFlags` / `NM80211ApSecurityFlags` bitmasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NmAccessPoint {
    pub ssid: String,
    pub bssid: String,
    pub strength: u8,
    pub mode: u32,
    pub flags: u32,
    pub wpa_flags: u32,
    pub rsn_flags: u32,
}

/// Connection currently active on a device, joined with its settings and AP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NmActiveConnection {
    pub id: String,
    pub autoconnect: bool,
    /// Profile exists only in memory (unsaved or volatile).
    pub temporary: bool,
    pub access_point: Option<NmAccessPoint>,
}

/// NetworkManager client for the wireless side of mesh acquisition
pub struct NetworkManagerClient {
    connection: Connection,
}

impl NetworkManagerClient {
    pub async fn new() -> Result<Self> {
        let connection = Connection::system()
            .await
            .context("Failed to connect to system D-Bus - is D-Bus running?")?;

        Ok(Self { connection })
    }

    async fn proxy<'a>(&'a self, path: &'a str, interface: &'a str) -> Result<zbus::Proxy<'a>> {
        zbus::Proxy::new(&self.connection, NM_BUS, path, interface)
            .await
            .with_context(|| format!("Failed to create {} proxy - is NetworkManager running?", interface))
    }

    async fn get_device_path(&self, interface: &str) -> Result<OwnedObjectPath> {
        let proxy = self.proxy(NM_PATH, NM_BUS).await?;

        let device_path: OwnedObjectPath = proxy
            .call_method("GetDeviceByIpIface", &(interface))
            .await
            .with_context(|| format!("Failed to get device path for interface '{}' - interface may not exist or may not be managed by NetworkManager", interface))?
            .body()
            .deserialize()
            .context("Failed to parse device path from NetworkManager response")?;

        Ok(device_path)
    }

    /// Lists every device NetworkManager manages as 802.11.
    pub async fn wifi_devices(&self) -> Result<Vec<NmWifiDevice>> {
        let proxy = self.proxy(NM_PATH, NM_BUS).await?;

        let device_paths: Vec<OwnedObjectPath> = proxy
            .call_method("GetDevices", &())
            .await
            .context("Failed to list NetworkManager devices")?
            .body()
            .deserialize()
            .context("Failed to parse device list")?;

        let mut devices = Vec::new();
        for path in device_paths {
            let device = self
                .proxy(path.as_str(), "org.freedesktop.NetworkManager.Device")
                .await?;
            let device_type: u32 = device.get_property("DeviceType").await.unwrap_or(0);
            if device_type != NM_DEVICE_TYPE_WIFI {
                continue;
            }

            let interface: String = device
                .get_property("Interface")
                .await
                .context("Failed to read device Interface property")?;
            let driver: String = device.get_property("Driver").await.unwrap_or_default();

            let wireless = self
                .proxy(path.as_str(), "org.freedesktop.NetworkManager.Device.Wireless")
                .await?;
            let hw_address: String = wireless
                .get_property("HwAddress")
                .await
                .with_context(|| format!("Failed to read hardware address of '{}'", interface))?;

            devices.push(NmWifiDevice {
                interface,
                driver,
                hw_address: hw_address.to_lowercase(),
            });
        }

        Ok(devices)
    }

    /// Returns the access points visible to `interface`.
    ///
    /// With `rescan` set a scan is requested first; a refused scan (rate
    /// limited, radio busy) is not an error and the cached list is returned.
    pub async fn access_points(&self, interface: &str, rescan: bool) -> Result<Vec<NmAccessPoint>> {
        let device_path = self.get_device_path(interface).await?;
        let wireless = self
            .proxy(device_path.as_str(), "org.freedesktop.NetworkManager.Device.Wireless")
            .await
            .context("Failed to create wireless device proxy - interface may not be a WiFi device")?;

        if rescan {
            let options: HashMap<String, Value> = HashMap::new();
            if let Err(e) = wireless.call_method("RequestScan", &(options,)).await {
                tracing::debug!(target: "wifi", iface = %interface, error = %e, "scan_request_refused");
            } else {
                tokio::time::sleep(tokio::time::Duration::from_secs(2)).await;
            }
        }

        let ap_paths: Vec<OwnedObjectPath> = wireless
            .call_method("GetAllAccessPoints", &())
            .await
            .context("Failed to get access points - interface may not support WiFi scanning")?
            .body()
            .deserialize()
            .context("Failed to parse access points")?;

        let mut access_points = Vec::with_capacity(ap_paths.len());
        for ap_path in ap_paths {
            match self.read_access_point(&ap_path).await {
                Ok(ap) => access_points.push(ap),
                // APs age out between GetAllAccessPoints and the property reads
                Err(e) => tracing::debug!(target: "wifi", path = %ap_path.as_str(), error = %e, "access_point_vanished"),
            }
        }

        Ok(access_points)
    }

    async fn read_access_point(&self, path: &OwnedObjectPath) -> Result<NmAccessPoint> {
        let ap = self
            .proxy(path.as_str(), "org.freedesktop.NetworkManager.AccessPoint")
            .await?;

        let ssid_bytes: Vec<u8> = ap.get_property("Ssid").await.context("Failed to read Ssid")?;
        let bssid: String = ap.get_property("HwAddress").await.context("Failed to read HwAddress")?;

        Ok(NmAccessPoint {
            ssid: String::from_utf8_lossy(&ssid_bytes).to_string(),
            bssid: bssid.to_lowercase(),
            strength: ap.get_property("Strength").await.unwrap_or(0),
            mode: ap.get_property("Mode").await.unwrap_or(0),
            flags: ap.get_property("Flags").await.unwrap_or(0),
            wpa_flags: ap.get_property("WpaFlags").await.unwrap_or(0),
            rsn_flags: ap.get_property("RsnFlags").await.unwrap_or(0),
        })
    }

    /// Connection active on `interface`, or `None` when the device is idle.
    pub async fn active_connection(&self, interface: &str) -> Result<Option<NmActiveConnection>> {
        let device_path = self.get_device_path(interface).await?;
        let device = self
            .proxy(device_path.as_str(), "org.freedesktop.NetworkManager.Device")
            .await?;

        let active_path: OwnedObjectPath = device
            .get_property("ActiveConnection")
            .await
            .with_context(|| format!("Failed to read active connection of '{}'", interface))?;
        if active_path.as_str() == "/" {
            return Ok(None);
        }

        let active = self
            .proxy(active_path.as_str(), "org.freedesktop.NetworkManager.Connection.Active")
            .await?;
        let id: String = active.get_property("Id").await.context("Failed to read connection Id")?;
        let settings_path: OwnedObjectPath = active
            .get_property("Connection")
            .await
            .context("Failed to read connection settings path")?;
        let ap_path: OwnedObjectPath = active
            .get_property("SpecificObject")
            .await
            .unwrap_or_else(|_| OwnedObjectPath::from(ObjectPath::from_static_str_unchecked("/")));

        let settings_proxy = self
            .proxy(settings_path.as_str(), "org.freedesktop.NetworkManager.Settings.Connection")
            .await?;
        let flags: u32 = settings_proxy.get_property("Flags").await.unwrap_or(0);
        let settings: SettingsMap = settings_proxy
            .call_method("GetSettings", &())
            .await
            .with_context(|| format!("Failed to read settings of connection '{}'", id))?
            .body()
            .deserialize()
            .context("Failed to parse connection settings")?;

        let access_point = if ap_path.as_str() == "/" {
            None
        } else {
            self.read_access_point(&ap_path).await.ok()
        };

        Ok(Some(NmActiveConnection {
            id,
            // NetworkManager treats a missing autoconnect key as true
            autoconnect: setting_bool(&settings, "connection", "autoconnect").unwrap_or(true),
            temporary: flags & (NM_SETTINGS_FLAG_UNSAVED | NM_SETTINGS_FLAG_VOLATILE) != 0,
            access_point,
        }))
    }

    /// Stored profile with id `profile_id`, skipping profiles bound to an
    /// interface other than `interface`.
    async fn find_connection(
        &self,
        profile_id: &str,
        interface: Option<&str>,
    ) -> Result<Option<OwnedObjectPath>> {
        let settings = self.proxy(NM_SETTINGS_PATH, "org.freedesktop.NetworkManager.Settings").await?;

        let paths: Vec<OwnedObjectPath> = settings
            .call_method("ListConnections", &())
            .await
            .context("Failed to list connection profiles")?
            .body()
            .deserialize()
            .context("Failed to parse connection list")?;

        for path in paths {
            let conn = self
                .proxy(path.as_str(), "org.freedesktop.NetworkManager.Settings.Connection")
                .await?;
            let map: SettingsMap = match conn.call_method("GetSettings", &()).await {
                Ok(reply) => match reply.body().deserialize() {
                    Ok(map) => map,
                    Err(_) => continue,
                },
                Err(_) => continue,
            };
            if profile_matches(&map, profile_id, interface) {
                return Ok(Some(path));
            }
        }

        Ok(None)
    }

    /// Persists a connection profile. Returns the settings object path.
    pub async fn add_connection(&self, settings: ConnectionSettings) -> Result<String> {
        let proxy = self.proxy(NM_SETTINGS_PATH, "org.freedesktop.NetworkManager.Settings").await?;

        let path: OwnedObjectPath = proxy
            .call_method("AddConnection", &(settings,))
            .await
            .map_err(|e| PlatformError::dbus("Settings.AddConnection", e))?
            .body()
            .deserialize()
            .context("Failed to parse AddConnection reply")?;

        tracing::info!(target: "wifi", path = %path.as_str(), "profile_installed");
        Ok(path.as_str().to_string())
    }

    /// Activates `profile_id` on `interface`.
    ///
    /// BSSIDs are tried in order; the first one currently visible is pinned as
    /// the specific object. When none is visible NetworkManager picks the AP.
    pub async fn activate_connection(
        &self,
        interface: &str,
        profile_id: &str,
        preferred_bssids: &[String],
    ) -> Result<()> {
        let connection_path = match self.find_connection(profile_id, Some(interface)).await? {
            Some(path) => path,
            None => {
                return Err(PlatformError::ProfileNotFound {
                    name: profile_id.to_string(),
                }
                .into())
            }
        };
        let device_path = self.get_device_path(interface).await?;

        let mut specific: Option<OwnedObjectPath> = None;
        if !preferred_bssids.is_empty() {
            let wireless = self
                .proxy(device_path.as_str(), "org.freedesktop.NetworkManager.Device.Wireless")
                .await?;
            let ap_paths: Vec<OwnedObjectPath> = wireless
                .call_method("GetAllAccessPoints", &())
                .await
                .context("Failed to get access points")?
                .body()
                .deserialize()
                .context("Failed to parse access points")?;

            let mut visible = Vec::new();
            for path in ap_paths {
                if let Ok(ap) = self.read_access_point(&path).await {
                    visible.push((ap.bssid, path));
                }
            }
            specific = preferred_bssids.iter().find_map(|wanted| {
                visible
                    .iter()
                    .find(|(bssid, _)| bssid.eq_ignore_ascii_case(wanted))
                    .map(|(_, path)| path.clone())
            });
        }

        let specific = specific
            .unwrap_or_else(|| OwnedObjectPath::from(ObjectPath::from_static_str_unchecked("/")));
        let pinned_ap = specific.as_str() != "/";

        let nm = self.proxy(NM_PATH, NM_BUS).await?;
        nm.call_method(
            "ActivateConnection",
            &(connection_path, device_path, specific),
        )
        .await
        .with_context(|| format!("Failed to activate '{}' on interface '{}'", profile_id, interface))?;

        tracing::info!(
            target: "wifi",
            iface = %interface,
            profile = %profile_id,
            pinned_ap,
            "connection_activated"
        );
        Ok(())
    }

    /// Deletes the stored profile named `profile_id`. Returns false when absent.
    ///
    /// With `interface` set, a same-named profile bound to another device is
    /// left alone.
    pub async fn delete_connection(&self, profile_id: &str, interface: Option<&str>) -> Result<bool> {
        let Some(path) = self.find_connection(profile_id, interface).await? else {
            return Ok(false);
        };

        let conn = self
            .proxy(path.as_str(), "org.freedesktop.NetworkManager.Settings.Connection")
            .await?;
        conn.call_method("Delete", &())
            .await
            .with_context(|| format!("Failed to delete connection profile '{}'", profile_id))?;

        tracing::info!(target: "wifi", profile = %profile_id, iface = ?interface, "profile_deleted");
        Ok(true)
    }
}

fn profile_matches(settings: &SettingsMap, profile_id: &str, interface: Option<&str>) -> bool {
    if setting_string(settings, "connection", "id").as_deref() != Some(profile_id) {
        return false;
    }
    match (interface, setting_string(settings, "connection", "interface-name")) {
        (Some(wanted), Some(bound)) if !bound.is_empty() => bound == wanted,
        _ => true,
    }
}

fn setting_value<'a>(settings: &'a SettingsMap, group: &str, key: &str) -> Option<&'a OwnedValue> {
    settings.get(group).and_then(|section| section.get(key))
}

fn setting_string(settings: &SettingsMap, group: &str, key: &str) -> Option<String> {
    let value = setting_value(settings, group, key)?.try_clone().ok()?;
    String::try_from(value).ok()
}

fn setting_bool(settings: &SettingsMap, group: &str, key: &str) -> Option<bool> {
    let value = setting_value(settings, group, key)?.try_clone().ok()?;
    bool::try_from(value).ok()
}
