//! Startup pruning of the `<root>/logs` directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};

use crate::config::LoggingConfig;

/// Upper bound for everything the daily appenders leave behind.
const LOG_DIR_CAP_BYTES: u64 = 50 * 1024 * 1024;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone)]
struct LogFile {
    path: PathBuf,
    modified: SystemTime,
    size: u64,
}

/// Deletes log files older than `keep_days`, then the oldest remaining ones
/// while the directory is over its size cap. Returns how many were removed.
pub fn run_retention(root: &Path, cfg: &LoggingConfig) -> Result<usize> {
    let files = log_files(&root.join("logs"))?;
    let doomed = select_for_removal(files, SystemTime::now(), cfg.keep_days, LOG_DIR_CAP_BYTES);

    let mut removed = 0;
    for path in doomed {
        match fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "log_removal_failed")
            }
        }
    }
    if removed > 0 {
        tracing::debug!(removed, "logs_pruned");
    }
    Ok(removed)
}

fn select_for_removal(
    mut files: Vec<LogFile>,
    now: SystemTime,
    keep_days: u64,
    cap_bytes: u64,
) -> Vec<PathBuf> {
    let cutoff = now
        .checked_sub(DAY.saturating_mul(u32::try_from(keep_days).unwrap_or(u32::MAX)))
        .unwrap_or(SystemTime::UNIX_EPOCH);

    // Oldest first: expired files lead, and the cap trims from the same end.
    files.sort_by_key(|f| f.modified);
    let mut total: u64 = files.iter().map(|f| f.size).sum();

    files
        .into_iter()
        .filter(|f| {
            let remove = f.modified < cutoff || total > cap_bytes;
            if remove {
                total = total.saturating_sub(f.size);
            }
            remove
        })
        .map(|f| f.path)
        .collect()
}

/// `meshlink.log`, `mesh.log.2026-01-01` and the like.
fn is_log_name(name: &str) -> bool {
    name.ends_with(".log") || name.contains(".log.")
}

fn log_files(dir: &Path) -> Result<Vec<LogFile>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err).with_context(|| format!("reading {}", dir.display())),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("iterating {}", dir.display()))?;
        let path = entry.path();
        if !path.file_name().and_then(|n| n.to_str()).is_some_and(is_log_name) {
            continue;
        }
        let metadata = entry
            .metadata()
            .with_context(|| format!("stat {}", path.display()))?;
        if !metadata.is_file() {
            continue;
        }
        files.push(LogFile {
            path,
            modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            size: metadata.len(),
        });
    }
    Ok(files)
}
