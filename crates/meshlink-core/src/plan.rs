//! Connection plans: everything needed to write, install and join a profile.
//!
//! Platform security identifiers are mapped to the profile vocabulary here
//! and nowhere else, so joining an existing mesh and creating a new one
//! express security the same way.

use meshlink_platform::escape_value;
use serde::Serialize;
use std::fmt;
use std::net::Ipv4Addr;

use crate::addressing::prefix_len;
use crate::error::{MeshError, Result};
use crate::inventory::{InventorySnapshot, NetworkKey};
use crate::template::{render, TemplateVars, Templates};

pub const DOT11_BSS_INDEPENDENT: &str = "dot11_BSS_type_independent";
pub const DOT11_AUTH_RSNA_PSK: &str = "DOT11_AUTH_ALGO_RSNA_PSK";
pub const DOT11_CIPHER_CCMP: &str = "DOT11_CIPHER_ALGO_CCMP";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AuthAlgorithm {
    Open,
    Shared,
    Wpa,
    WpaPsk,
    Wpa2,
    Wpa2Psk,
}

impl AuthAlgorithm {
    pub fn from_dot11(value: &str) -> Result<Self> {
        match value {
            "DOT11_AUTH_ALGO_80211_OPEN" => Ok(Self::Open),
            "DOT11_AUTH_ALGO_80211_SHARED_KEY" => Ok(Self::Shared),
            "DOT11_AUTH_ALGO_WPA" => Ok(Self::Wpa),
            "DOT11_AUTH_ALGO_WPA_PSK" => Ok(Self::WpaPsk),
            "DOT11_AUTH_ALGO_RSNA" => Ok(Self::Wpa2),
            "DOT11_AUTH_ALGO_RSNA_PSK" => Ok(Self::Wpa2Psk),
            other => Err(MeshError::UnmappedSecurity {
                field: "auth",
                value: other.to_string(),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Shared => "shared",
            Self::Wpa => "WPA",
            Self::WpaPsk => "WPAPSK",
            Self::Wpa2 => "WPA2",
            Self::Wpa2Psk => "WPA2PSK",
        }
    }

    /// NetworkManager `key-mgmt` value.
    fn key_mgmt(&self) -> &'static str {
        match self {
            Self::Open | Self::Shared => "none",
            Self::Wpa | Self::Wpa2 => "wpa-eap",
            Self::WpaPsk | Self::Wpa2Psk => "wpa-psk",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CipherAlgorithm {
    None,
    Wep,
    Tkip,
    Aes,
}

impl CipherAlgorithm {
    pub fn from_dot11(value: &str) -> Result<Self> {
        match value {
            "DOT11_CIPHER_ALGO_NONE" => Ok(Self::None),
            "DOT11_CIPHER_ALGO_WEP40" | "DOT11_CIPHER_ALGO_WEP104" | "DOT11_CIPHER_ALGO_WEP" => {
                Ok(Self::Wep)
            }
            "DOT11_CIPHER_ALGO_TKIP" => Ok(Self::Tkip),
            "DOT11_CIPHER_ALGO_CCMP" => Ok(Self::Aes),
            other => Err(MeshError::UnmappedSecurity {
                field: "cipher",
                value: other.to_string(),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Wep => "WEP",
            Self::Tkip => "TKIP",
            Self::Aes => "AES",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BssType {
    Infrastructure,
    Independent,
}

impl BssType {
    pub fn from_dot11(value: &str) -> Result<Self> {
        match value {
            "dot11_BSS_type_infrastructure" => Ok(Self::Infrastructure),
            "dot11_BSS_type_independent" => Ok(Self::Independent),
            other => Err(MeshError::UnmappedSecurity {
                field: "bss_type",
                value: other.to_string(),
            }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Infrastructure => "ESS",
            Self::Independent => "IBSS",
        }
    }

    fn wifi_mode(&self) -> &'static str {
        match self {
            Self::Infrastructure => "infrastructure",
            Self::Independent => "adhoc",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum KeyType {
    WepKey,
    Passphrase,
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::WepKey => "WEP key",
            Self::Passphrase => "passphrase",
        })
    }
}

/// What to connect to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanTarget {
    /// A cell from the inventory index.
    Existing(NetworkKey),
    /// A new ad-hoc cell created on the given interface.
    NewMesh {
        interface_id: String,
        ssid: String,
        bssid: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanRequest {
    pub target: PlanTarget,
    pub key_material: Option<String>,
    pub ip: Ipv4Addr,
    pub netmask: Ipv4Addr,
}

/// Fully resolved connection attempt. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionPlan {
    pub interface_id: String,
    pub interface_name: String,
    pub profile_name: String,
    pub ssid: String,
    pub ssid_hex: String,
    pub bssid: String,
    pub dot11_bss_type: String,
    pub bss_type: BssType,
    pub auth: AuthAlgorithm,
    pub cipher: CipherAlgorithm,
    #[serde(skip_serializing)]
    pub key_material: Option<String>,
    pub key_type: KeyType,
    #[serde(skip_serializing)]
    pub shared_key: String,
    pub ip: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub prefix_len: u8,
}

impl ConnectionPlan {
    /// Renders the wireless profile document for this plan.
    pub fn render_profile(&self, templates: &Templates) -> Result<String> {
        let mut vars = TemplateVars::new();
        vars.insert("profile_name", escape_value(&self.profile_name));
        vars.insert("interface_name", escape_value(&self.interface_name));
        vars.insert("wifi_mode", self.bss_type.wifi_mode().to_string());
        vars.insert("ssid", escape_value(&self.ssid));
        vars.insert("ssid_hex", self.ssid_hex.clone());
        vars.insert("bssid", self.bssid.clone());
        vars.insert("bss_type", self.bss_type.as_str().to_string());
        vars.insert("auth", self.auth.as_str().to_string());
        vars.insert("cipher", self.cipher.as_str().to_string());
        vars.insert("shared_key", self.shared_key.clone());
        vars.insert("ip", self.ip.to_string());
        vars.insert("netmask", self.netmask.to_string());
        vars.insert("prefix_len", self.prefix_len.to_string());
        render(&templates.profile, &vars)
    }
}

pub fn ssid_hex(ssid: &str) -> String {
    ssid.bytes().map(|b| format!("{:02X}", b)).collect()
}

struct Resolved<'a> {
    interface_id: &'a str,
    interface_name: &'a str,
    ssid: &'a str,
    bssid: &'a str,
    dot11_bss_type: &'a str,
    auth: &'a str,
    cipher: &'a str,
}

/// Builds the plan for `request` against `snapshot`.
pub fn make_plan(
    snapshot: &InventorySnapshot,
    request: &PlanRequest,
    templates: &Templates,
) -> Result<ConnectionPlan> {
    let resolved = match &request.target {
        PlanTarget::Existing(key) => {
            let detail = snapshot
                .detail(key)
                .ok_or_else(|| MeshError::NetworkNotInInventory {
                    interface: key.interface.clone(),
                    ssid: key.ssid.clone(),
                    bssid: key.bssid.clone(),
                })?;
            Resolved {
                interface_id: &detail.interface_id,
                interface_name: &detail.interface_name,
                ssid: &detail.ssid,
                bssid: &detail.bssid,
                dot11_bss_type: &detail.dot11_bss_type,
                auth: &detail.auth,
                cipher: &detail.cipher,
            }
        }
        PlanTarget::NewMesh {
            interface_id,
            ssid,
            bssid,
        } => {
            let iface = snapshot
                .interface(interface_id)
                .ok_or_else(|| MeshError::InterfaceNotFound {
                    name: interface_id.clone(),
                })?;
            Resolved {
                interface_id: &iface.id,
                interface_name: &iface.name,
                ssid,
                bssid,
                dot11_bss_type: DOT11_BSS_INDEPENDENT,
                auth: DOT11_AUTH_RSNA_PSK,
                cipher: DOT11_CIPHER_CCMP,
            }
        }
    };

    let auth = AuthAlgorithm::from_dot11(resolved.auth)?;
    let cipher = CipherAlgorithm::from_dot11(resolved.cipher)?;
    let bss_type = BssType::from_dot11(resolved.dot11_bss_type)?;
    let key_type = if cipher == CipherAlgorithm::Wep {
        KeyType::WepKey
    } else {
        KeyType::Passphrase
    };

    let shared_key = match &request.key_material {
        Some(key) => {
            let mut vars = TemplateVars::new();
            vars.insert("key_type", key_type.to_string());
            vars.insert("key_mgmt", auth.key_mgmt().to_string());
            vars.insert(
                "key_setting",
                if cipher == CipherAlgorithm::Wep { "wep-key0" } else { "psk" }.to_string(),
            );
            vars.insert("key_material", escape_value(key));
            render(&templates.shared_key, &vars)?
        }
        None => String::new(),
    };

    let plan = ConnectionPlan {
        interface_id: resolved.interface_id.to_string(),
        interface_name: resolved.interface_name.to_string(),
        profile_name: resolved.ssid.to_string(),
        ssid: resolved.ssid.to_string(),
        ssid_hex: ssid_hex(resolved.ssid),
        bssid: resolved.bssid.to_string(),
        dot11_bss_type: resolved.dot11_bss_type.to_string(),
        bss_type,
        auth,
        cipher,
        key_material: request.key_material.clone(),
        key_type,
        shared_key,
        ip: request.ip,
        netmask: request.netmask,
        prefix_len: prefix_len(request.netmask)?,
    };

    tracing::info!(
        target: "mesh",
        iface = %plan.interface_name,
        ssid = %plan.ssid,
        bssid = %plan.bssid,
        auth = plan.auth.as_str(),
        cipher = plan.cipher.as_str(),
        bss_type = plan.bss_type.as_str(),
        "plan_built"
    );
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::tests::bss;
    use crate::model::Addressing;
    use crate::platform::tests::MockPlatform;

    fn snapshot_with(cells: Vec<crate::platform::VisibleBss>) -> InventorySnapshot {
        let mock = MockPlatform::new();
        mock.add_interface("aa:bb:cc:dd:ee:01", "wlan0", Addressing::default());
        for cell in cells {
            mock.add_network("wlan0", cell);
        }
        InventorySnapshot::refresh(&mock, &mock).unwrap()
    }

    fn existing(ssid: &str, bssid: &str, key: Option<&str>) -> PlanRequest {
        PlanRequest {
            target: PlanTarget::Existing(NetworkKey {
                interface: "wlan0".to_string(),
                ssid: ssid.to_string(),
                bssid: bssid.to_string(),
            }),
            key_material: key.map(str::to_string),
            ip: Ipv4Addr::new(5, 1, 2, 3),
            netmask: Ipv4Addr::new(255, 0, 0, 0),
        }
    }

    #[test]
    fn test_existing_mesh_resolves_wpa2psk_aes() {
        let snap = snapshot_with(vec![bss("commotionwireless.net", "02:CA:FF:EE:BA:BE", 80)]);
        let plan = make_plan(
            &snap,
            &existing("commotionwireless.net", "02:CA:FF:EE:BA:BE", Some("meshpass")),
            &Templates::default(),
        )
        .unwrap();

        assert_eq!(plan.auth, AuthAlgorithm::Wpa2Psk);
        assert_eq!(plan.cipher, CipherAlgorithm::Aes);
        assert_eq!(plan.bss_type, BssType::Independent);
        assert_eq!(plan.key_type, KeyType::Passphrase);
        assert_eq!(plan.profile_name, "commotionwireless.net");
        assert_eq!(plan.prefix_len, 8);
        assert!(plan.shared_key.contains("key-mgmt=wpa-psk"));
        assert!(plan.shared_key.contains("psk=meshpass"));
    }

    #[test]
    fn test_new_mesh_is_independent_wpa2psk() {
        let snap = snapshot_with(Vec::new());
        let request = PlanRequest {
            target: PlanTarget::NewMesh {
                interface_id: "aa:bb:cc:dd:ee:01".to_string(),
                ssid: "testmesh".to_string(),
                bssid: "02:CA:FF:EE:BA:BE".to_string(),
            },
            key_material: Some("p@ss".to_string()),
            ip: Ipv4Addr::new(10, 1, 2, 3),
            netmask: Ipv4Addr::new(255, 255, 0, 0),
        };
        let plan = make_plan(&snap, &request, &Templates::default()).unwrap();

        assert_eq!(plan.bss_type, BssType::Independent);
        assert_eq!(plan.auth, AuthAlgorithm::Wpa2Psk);
        assert_eq!(plan.cipher, CipherAlgorithm::Aes);
        assert_eq!(plan.interface_name, "wlan0");
        assert_eq!(plan.ssid_hex, "746573746D657368");
    }

    #[test]
    fn test_unknown_cipher_is_rejected_not_defaulted() {
        let mut cell = bss("odd", "66:55:44:33:22:11", 50);
        cell.cipher = "DOT11_CIPHER_ALGO_GCMP".to_string();
        let snap = snapshot_with(vec![cell]);
        let err = make_plan(&snap, &existing("odd", "66:55:44:33:22:11", None), &Templates::default())
            .unwrap_err();
        assert!(matches!(err, MeshError::UnmappedSecurity { field: "cipher", .. }));
    }

    #[test]
    fn test_any_bss_type_is_rejected() {
        let mut cell = bss("odd", "66:55:44:33:22:11", 50);
        cell.dot11_bss_type = "dot11_BSS_type_any".to_string();
        let snap = snapshot_with(vec![cell]);
        let err = make_plan(&snap, &existing("odd", "66:55:44:33:22:11", None), &Templates::default())
            .unwrap_err();
        assert!(matches!(err, MeshError::UnmappedSecurity { field: "bss_type", .. }));
    }

    #[test]
    fn test_wep_cipher_uses_wep_key_type() {
        let mut cell = bss("legacy", "66:55:44:33:22:11", 50);
        cell.auth = "DOT11_AUTH_ALGO_80211_OPEN".to_string();
        cell.cipher = "DOT11_CIPHER_ALGO_WEP104".to_string();
        cell.dot11_bss_type = "dot11_BSS_type_infrastructure".to_string();
        let snap = snapshot_with(vec![cell]);
        let plan = make_plan(
            &snap,
            &existing("legacy", "66:55:44:33:22:11", Some("0123456789")),
            &Templates::default(),
        )
        .unwrap();

        assert_eq!(plan.key_type, KeyType::WepKey);
        assert_eq!(plan.key_type.to_string(), "WEP key");
        assert!(plan.shared_key.contains("wep-key0=0123456789"));
        assert!(plan.shared_key.contains("key-mgmt=none"));
    }

    #[test]
    fn test_no_key_material_means_empty_shared_key() {
        let snap = snapshot_with(vec![bss("open", "66:55:44:33:22:11", 50)]);
        let plan = make_plan(&snap, &existing("open", "66:55:44:33:22:11", None), &Templates::default())
            .unwrap();
        assert_eq!(plan.shared_key, "");
        assert!(!plan.render_profile(&Templates::default()).unwrap().contains("[wifi-security]"));
    }

    #[test]
    fn test_rendered_profile_carries_identity_and_address() {
        let snap = snapshot_with(vec![bss("commotionwireless.net", "02:CA:FF:EE:BA:BE", 80)]);
        let plan = make_plan(
            &snap,
            &existing("commotionwireless.net", "02:CA:FF:EE:BA:BE", Some("meshpass")),
            &Templates::default(),
        )
        .unwrap();
        let doc = plan.render_profile(&Templates::default()).unwrap();

        assert!(doc.contains("id=commotionwireless.net\n"));
        assert!(doc.contains("interface-name=wlan0\n"));
        assert!(doc.contains("mode=adhoc\n"));
        assert!(doc.contains("bssid=02:CA:FF:EE:BA:BE\n"));
        assert!(doc.contains("address1=5.1.2.3/8\n"));
        assert!(doc.contains("[wifi-security]"));
    }

    #[test]
    fn test_unknown_cell_names_the_network() {
        let snap = snapshot_with(vec![bss("mesh", "02:CA:FF:EE:BA:BE", 80)]);
        let err = make_plan(&snap, &existing("other", "02:CA:FF:EE:BA:BE", None), &Templates::default())
            .unwrap_err();
        match err {
            MeshError::NetworkNotInInventory { interface, ssid, bssid } => {
                assert_eq!(interface, "wlan0");
                assert_eq!(ssid, "other");
                assert_eq!(bssid, "02:CA:FF:EE:BA:BE");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    fn new_mesh(ssid: &str, key: &str) -> PlanRequest {
        PlanRequest {
            target: PlanTarget::NewMesh {
                interface_id: "aa:bb:cc:dd:ee:01".to_string(),
                ssid: ssid.to_string(),
                bssid: "02:CA:FF:EE:BA:BE".to_string(),
            },
            key_material: Some(key.to_string()),
            ip: Ipv4Addr::new(10, 1, 2, 3),
            netmask: Ipv4Addr::new(255, 255, 0, 0),
        }
    }

    #[test]
    fn test_rendered_profile_keeps_ssid_and_key_edges() {
        let snap = snapshot_with(Vec::new());
        let plan = make_plan(&snap, &new_mesh("mesh ", " secret pass "), &Templates::default()).unwrap();
        let doc = plan.render_profile(&Templates::default()).unwrap();

        let kf = meshlink_platform::Keyfile::parse(&doc).unwrap();
        assert_eq!(kf.get("wifi", "ssid"), Some("mesh "));
        assert_eq!(kf.id(), Some("mesh "));
        assert_eq!(kf.get("wifi-security", "psk"), Some(" secret pass "));
    }

    #[test]
    fn test_key_material_cannot_switch_addressing_to_dhcp() {
        let snap = snapshot_with(Vec::new());
        let psk = "secretpass\n[ipv4]\nmethod=auto";
        let plan = make_plan(&snap, &new_mesh("testmesh", psk), &Templates::default()).unwrap();
        let doc = plan.render_profile(&Templates::default()).unwrap();

        let kf = meshlink_platform::Keyfile::parse(&doc).unwrap();
        assert_eq!(kf.get("wifi-security", "psk"), Some(psk));
        assert_eq!(kf.get("ipv4", "method"), Some("manual"));
    }

    #[test]
    fn test_ssid_hex_is_uppercase() {
        assert_eq!(ssid_hex("abc"), "616263");
        assert_eq!(ssid_hex("\u{ff}"), "C3BF");
    }
}
