//! Routing daemon process helpers.

use crate::error::{PlatformError, Result};
use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};

/// Launches `program` detached from our stdio. Returns its pid.
///
/// The child is not waited on; the routing daemon outlives the acquisition.
pub fn spawn_detached(program: &Path, args: &[String]) -> Result<u32> {
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|source| PlatformError::Spawn {
            program: program.display().to_string(),
            source,
        })?;

    let pid = child.id();
    tracing::info!(target: "mesh", program = %program.display(), pid, "daemon_spawned");
    Ok(pid)
}

#[derive(Debug, Clone)]
pub struct ProcessInfo {
    pub pid: i32,
    pub name: String,
    pub cmdline: String,
}

/// Reads the process table from `/proc`.
pub struct ProcessManager;

impl ProcessManager {
    pub fn new() -> Self {
        Self
    }

    /// Processes whose comm or argv[0] basename equals `name`.
    pub fn find_by_name(&self, name: &str) -> Result<Vec<ProcessInfo>> {
        let entries = fs::read_dir("/proc")
            .map_err(|e| PlatformError::ProcRead(format!("Failed to read /proc: {}", e)))?;

        let mut out = Vec::new();
        for entry in entries.flatten() {
            let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<i32>().ok()) else {
                continue;
            };
            let dir = entry.path();
            // Processes exit while we walk; skip them quietly.
            let comm = fs::read_to_string(dir.join("comm"))
                .map(|s| s.trim().to_string())
                .unwrap_or_default();
            let cmdline = fs::read(dir.join("cmdline"))
                .map(|raw| {
                    raw.split(|b| *b == 0)
                        .filter(|part| !part.is_empty())
                        .map(|part| String::from_utf8_lossy(part).to_string())
                        .collect::<Vec<_>>()
                        .join(" ")
                })
                .unwrap_or_default();

            let argv0 = cmdline
                .split_whitespace()
                .next()
                .and_then(|p| Path::new(p).file_name())
                .and_then(|n| n.to_str())
                .unwrap_or("");

            if comm == name || argv0 == name {
                out.push(ProcessInfo {
                    pid,
                    name: comm,
                    cmdline,
                });
            }
        }

        Ok(out)
    }
}

impl Default for ProcessManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_reports_missing_program() {
        let err = spawn_detached(Path::new("/nonexistent/meshlink-daemon"), &[]).unwrap_err();
        assert!(matches!(err, PlatformError::Spawn { .. }));
    }

    #[test]
    fn test_find_by_name_ignores_unknown_process() {
        let pm = ProcessManager::new();
        let found = pm.find_by_name("meshlink-no-such-process-name").unwrap();
        assert!(found.is_empty());
    }
}
