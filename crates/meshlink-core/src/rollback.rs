//! Single-slot snapshot of an interface's configuration before a mesh
//! displaced it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{MeshError, Result};
use crate::model::{Addressing, ConnectionMode, Interface};
use crate::persist::write_atomic;

pub const ROLLBACK_VERSION: u32 = 1;

/// Whether a connection in `mode` can be re-entered deterministically.
///
/// `None` is "not connected": there is nothing to go back to.
pub fn restorable(mode: Option<ConnectionMode>) -> bool {
    matches!(
        mode,
        Some(ConnectionMode::Profile | ConnectionMode::TemporaryProfile | ConnectionMode::Auto)
    )
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedInterface {
    pub id: String,
    pub name: String,
    pub addressing: Addressing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackRecord {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub restore: bool,
    pub mode: Option<ConnectionMode>,
    pub profile_name: Option<String>,
    pub ssid: Option<String>,
    pub bssid: Option<String>,
    pub dot11_bss_type: Option<String>,
    /// SSID of the mesh profile that displaced the connection.
    pub mesh_ssid: String,
    pub delete_mesh_after_restore: bool,
    pub interface: CapturedInterface,
}

impl RollbackRecord {
    /// Captures `iface` as it was when the inventory was taken.
    pub fn capture(iface: &Interface, displacing_ssid: &str) -> Self {
        let conn = iface.initial_connection.as_ref();
        let mode = conn.map(|c| c.mode);
        Self {
            version: ROLLBACK_VERSION,
            saved_at: Utc::now(),
            restore: restorable(mode),
            mode,
            profile_name: conn.map(|c| c.profile_name.clone()),
            ssid: conn.map(|c| c.ssid.clone()),
            bssid: conn.map(|c| c.bssid.clone()),
            dot11_bss_type: conn.map(|c| c.dot11_bss_type.clone()),
            mesh_ssid: displacing_ssid.to_string(),
            delete_mesh_after_restore: true,
            interface: CapturedInterface {
                id: iface.id.clone(),
                name: iface.name.clone(),
                addressing: iface.addressing.clone(),
            },
        }
    }

    /// Mode to reconnect with. Auto cannot be re-entered directly and is
    /// replayed as a profile connection.
    pub fn restore_mode(&self) -> Option<ConnectionMode> {
        match self.mode {
            Some(ConnectionMode::Auto) => Some(ConnectionMode::Profile),
            other => other,
        }
    }
}

/// The rollback file. Each save overwrites the previous record.
#[derive(Debug, Clone)]
pub struct RollbackStore {
    path: PathBuf,
}

impl RollbackStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn save(&self, iface: &Interface, displacing_ssid: &str) -> Result<RollbackRecord> {
        let record = RollbackRecord::capture(iface, displacing_ssid);
        let json = serde_json::to_vec_pretty(&record).map_err(|e| MeshError::RollbackCorrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        write_atomic(&self.path, &json)?;

        tracing::info!(
            target: "mesh",
            iface = %record.interface.name,
            restore = record.restore,
            mode = record.mode.map(|m| m.as_str()).unwrap_or("none"),
            path = %self.path.display(),
            "rollback_saved"
        );
        Ok(record)
    }

    /// `Ok(None)` when no record exists: nothing to restore.
    pub fn load(&self) -> Result<Option<RollbackRecord>> {
        let raw = match fs::read(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(MeshError::io(format!("reading {}", self.path.display()), e));
            }
        };
        let record: RollbackRecord =
            serde_json::from_slice(&raw).map_err(|e| MeshError::RollbackCorrupt {
                path: self.path.clone(),
                reason: e.to_string(),
            })?;
        if record.version != ROLLBACK_VERSION {
            return Err(MeshError::RollbackCorrupt {
                path: self.path.clone(),
                reason: format!("unsupported version {}", record.version),
            });
        }
        Ok(Some(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ConnectionInfo;
    use std::net::Ipv4Addr;
    use tempfile::TempDir;

    fn iface(mode: Option<ConnectionMode>) -> Interface {
        Interface {
            id: "aa:bb:cc:dd:ee:01".to_string(),
            name: "wlan0".to_string(),
            description: "test".to_string(),
            mac: "aa:bb:cc:dd:ee:01".to_string(),
            addressing: Addressing {
                dhcp_enabled: false,
                ips: vec![Ipv4Addr::new(192, 168, 1, 40)],
                subnet_masks: vec![Ipv4Addr::new(255, 255, 255, 0)],
                gateways: vec![Ipv4Addr::new(192, 168, 1, 1)],
            },
            initial_connection: mode.map(|mode| ConnectionInfo {
                profile_name: "home".to_string(),
                ssid: "home".to_string(),
                bssid: "66:55:44:33:22:11".to_string(),
                mode,
                dot11_bss_type: "dot11_BSS_type_infrastructure".to_string(),
            }),
        }
    }

    #[test]
    fn test_restorability_follows_mode_table() {
        assert!(restorable(Some(ConnectionMode::Profile)));
        assert!(restorable(Some(ConnectionMode::TemporaryProfile)));
        assert!(restorable(Some(ConnectionMode::Auto)));
        assert!(!restorable(Some(ConnectionMode::DiscoverySecure)));
        assert!(!restorable(Some(ConnectionMode::DiscoveryUnsecure)));
        assert!(!restorable(None));
    }

    #[test]
    fn test_auto_is_replayed_as_profile() {
        let record = RollbackRecord::capture(&iface(Some(ConnectionMode::Auto)), "mesh");
        assert!(record.restore);
        assert_eq!(record.restore_mode(), Some(ConnectionMode::Profile));
    }

    #[test]
    fn test_missing_file_is_nothing_to_restore() {
        let dir = TempDir::new().unwrap();
        let store = RollbackStore::new(dir.path().join("state/rollback.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_save_then_load_returns_latest_record() {
        let dir = TempDir::new().unwrap();
        let store = RollbackStore::new(dir.path().join("state/rollback.json"));
        store.save(&iface(Some(ConnectionMode::Profile)), "first").unwrap();
        let saved = store.save(&iface(None), "second").unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded, saved);
        assert_eq!(loaded.mesh_ssid, "second");
        assert!(!loaded.restore);
        assert!(loaded.delete_mesh_after_restore);
        assert_eq!(loaded.interface.addressing.gateways, vec![Ipv4Addr::new(192, 168, 1, 1)]);
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rollback.json");
        fs::write(&path, b"{ not json").unwrap();
        let err = RollbackStore::new(&path).load().unwrap_err();
        assert!(matches!(err, MeshError::RollbackCorrupt { .. }));
    }
}
