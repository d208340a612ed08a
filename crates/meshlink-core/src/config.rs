use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::model::DEFAULT_MESH_BSSID;

const DEFAULT_ROOT_PATH: &str = "/var/lib/meshlink";
const DEFAULT_DAEMON_PATH: &str = "/usr/sbin/olsrd";
const DEFAULT_SETTLE_SECS: u64 = 3;

/// Runtime settings, read from `MESHLINK_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshConfig {
    pub root: PathBuf,
    pub daemon_path: PathBuf,
    /// Wait between reassociation and readdressing during restore.
    pub settle: Duration,
    /// BSSID given to newly created meshes when the profile names none.
    pub mesh_bssid: String,
}

impl MeshConfig {
    pub fn from_env(root: PathBuf) -> Self {
        let daemon_path = env::var("MESHLINK_DAEMON_PATH")
            .ok()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DAEMON_PATH));
        let settle_secs = env::var("MESHLINK_SETTLE_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_SETTLE_SECS);
        let mesh_bssid =
            env::var("MESHLINK_MESH_BSSID").unwrap_or_else(|_| DEFAULT_MESH_BSSID.to_string());

        Self {
            root,
            daemon_path,
            settle: Duration::from_secs(settle_secs),
            mesh_bssid,
        }
    }

    /// Defaults rooted at `root`, ignoring the environment.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            daemon_path: PathBuf::from(DEFAULT_DAEMON_PATH),
            settle: Duration::from_secs(DEFAULT_SETTLE_SECS),
            mesh_bssid: DEFAULT_MESH_BSSID.to_string(),
        }
    }

    pub fn rollback_path(&self) -> PathBuf {
        self.root.join("state").join("rollback.json")
    }

    pub fn generated_dir(&self) -> PathBuf {
        self.root.join("generated")
    }

    pub fn templates_dir(&self) -> PathBuf {
        self.root.join("templates")
    }

    pub fn profiles_dir(&self) -> PathBuf {
        self.root.join("profiles")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn logging_config_path(&self) -> PathBuf {
        meshlink_logging::fs::config_path(&self.root)
    }
}

pub fn resolve_root(input: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = input {
        return Ok(path);
    }

    if let Ok(env_path) = env::var("MESHLINK_ROOT") {
        return Ok(PathBuf::from(env_path));
    }

    let default = Path::new(DEFAULT_ROOT_PATH);
    if default.exists() {
        return Ok(default.to_path_buf());
    }

    env::current_dir().context("determining current directory")
}
