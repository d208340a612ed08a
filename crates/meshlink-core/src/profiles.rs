use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::addressing::prefix_len;
use crate::error::{MeshError, Result};
use crate::inventory::{InventorySnapshot, NetworkKey};
use crate::model::DEFAULT_MESH_BSSID;
use crate::persist::write_atomic;

fn default_bssid() -> String {
    DEFAULT_MESH_BSSID.to_string()
}

fn bssid_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([0-9A-Fa-f]{2}:){5}[0-9A-Fa-f]{2}$").ok())
        .as_ref()
}

fn name_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]{0,63}$").ok())
        .as_ref()
}

/// A mesh the operator wants to be on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshProfile {
    pub ssid: String,
    #[serde(default = "default_bssid")]
    pub bssid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub psk: Option<String>,
    pub ip: Ipv4Addr,
    pub netmask: Ipv4Addr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl MeshProfile {
    pub fn validate(&self, name: &str) -> Result<()> {
        let invalid = |reason: String| MeshError::InvalidProfile {
            name: name.to_string(),
            reason,
        };

        if self.ssid.is_empty() || self.ssid.len() > 32 {
            return Err(invalid(format!(
                "ssid must be 1-32 bytes, got {}",
                self.ssid.len()
            )));
        }
        if self.ssid.chars().any(char::is_control) {
            return Err(invalid("ssid contains control characters".to_string()));
        }
        if self.psk.as_deref().is_some_and(|psk| psk.chars().any(char::is_control)) {
            return Err(invalid("psk contains control characters".to_string()));
        }
        if !bssid_re().is_some_and(|re| re.is_match(&self.bssid)) {
            return Err(invalid(format!("bssid '{}' is not XX:XX:XX:XX:XX:XX", self.bssid)));
        }
        prefix_len(self.netmask).map_err(|_| invalid(format!("netmask {} is not contiguous", self.netmask)))?;
        if self.ip.is_unspecified() || self.ip.is_broadcast() {
            return Err(invalid(format!("ip {} cannot be assigned", self.ip)));
        }
        Ok(())
    }

    /// Visible cells of this mesh in `snapshot`.
    pub fn available_networks(&self, snapshot: &InventorySnapshot) -> Vec<NetworkKey> {
        snapshot.find_matching(&self.ssid, &self.bssid)
    }
}

/// Mesh profiles kept as `<dir>/<name>.json`.
#[derive(Debug, Clone)]
pub struct ProfileStore {
    dir: PathBuf,
}

impl ProfileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        if !name_re().is_some_and(|re| re.is_match(name)) {
            return Err(MeshError::InvalidProfile {
                name: name.to_string(),
                reason: "profile names use letters, digits, '.', '_' and '-'".to_string(),
            });
        }
        Ok(self.dir.join(format!("{name}.json")))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn list(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(MeshError::io(format!("listing {}", self.dir.display()), e)),
        };

        let mut names: Vec<String> = entries
            .flatten()
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    return None;
                }
                path.file_stem().and_then(|s| s.to_str()).map(str::to_string)
            })
            .collect();
        names.sort();
        Ok(names)
    }

    pub fn load(&self, name: &str) -> Result<MeshProfile> {
        let path = self.path_for(name)?;
        let raw = fs::read(&path).map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                MeshError::InvalidProfile {
                    name: name.to_string(),
                    reason: format!("no profile at {}", path.display()),
                }
            } else {
                MeshError::io(format!("reading {}", path.display()), e)
            }
        })?;
        let profile: MeshProfile = serde_json::from_slice(&raw).map_err(|e| MeshError::InvalidProfile {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        profile.validate(name)?;
        Ok(profile)
    }

    pub fn save(&self, name: &str, profile: &MeshProfile) -> Result<PathBuf> {
        let path = self.path_for(name)?;
        profile.validate(name)?;
        let json = serde_json::to_vec_pretty(profile).map_err(|e| MeshError::InvalidProfile {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        write_atomic(&path, &json)?;
        tracing::info!(target: "mesh", profile = %name, ssid = %profile.ssid, "mesh_profile_saved");
        Ok(path)
    }

    /// Returns false when there was no such profile.
    pub fn delete(&self, name: &str) -> Result<bool> {
        let path = self.path_for(name)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(MeshError::io(format!("removing {}", path.display()), e)),
        }
    }
}
