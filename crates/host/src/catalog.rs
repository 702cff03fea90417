// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Driver catalog: directory scanning, on-demand meta export and the
//! in-memory index keyed by driver id.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use md5::{Digest, Md5};
use parking_lot::Mutex;
use serde::Serialize;

use iolink_core::DriverMeta;

use crate::platform;

/// Suffix marking a soft-quarantined driver directory.
const FAILED_SUFFIX: &str = ".failed";

/// Bound on a driver's `--export-meta` run.
const EXPORT_TIMEOUT: Duration = Duration::from_secs(10);

/// One catalog row: a discovered driver and its parsed descriptor.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub id: String,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub meta: Arc<DriverMeta>,
    /// md5 over the meta file bytes; a stable hash means the meta is
    /// unchanged and a reload may be skipped.
    pub meta_hash: String,
}

/// Counters reported by a scan run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanStats {
    pub scanned: usize,
    pub updated: usize,
    pub newly_failed: usize,
    pub skipped_failed: usize,
}

/// Scans a drivers directory and produces catalog rows.
#[derive(Debug, Default)]
pub struct DriverScanner {
    /// Overrides the host binary directory prepended to a driver's PATH
    /// during meta export. Defaults to the running executable's directory.
    pub host_bin_dir: Option<PathBuf>,
}

impl DriverScanner {
    pub fn new() -> Self {
        DriverScanner::default()
    }

    /// Scan every immediate subdirectory of `drivers_dir`.
    ///
    /// Directories already suffixed `.failed` are skipped. A directory
    /// without a meta file gets one export attempt; on failure it is
    /// renamed `<name>.failed` so operators must act to re-enable it.
    /// Invalid meta excludes the driver without quarantining it.
    pub async fn scan(
        &self,
        drivers_dir: &Path,
        refresh_meta: bool,
    ) -> (HashMap<String, DriverConfig>, ScanStats) {
        let mut result = HashMap::new();
        let mut stats = ScanStats::default();

        let Ok(entries) = std::fs::read_dir(drivers_dir) else {
            return (result, stats);
        };
        let mut dirs: Vec<PathBuf> =
            entries.flatten().map(|e| e.path()).filter(|p| p.is_dir()).collect();
        dirs.sort();

        for dir in dirs {
            let name = dir.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_string();
            if name.ends_with(FAILED_SUFFIX) {
                stats.skipped_failed += 1;
                continue;
            }
            stats.scanned += 1;

            let meta_path = dir.join("driver.meta.json");
            let executable = platform::find_driver_executable(&dir);

            if !meta_path.exists() {
                let exported = match &executable {
                    Some(exe) => self.try_export_meta(exe, &meta_path).await,
                    None => false,
                };
                if !exported {
                    tracing::warn!(driver = %name, "meta export failed, marking failed");
                    if mark_failed(&dir) {
                        stats.newly_failed += 1;
                    } else {
                        tracing::warn!(dir = %dir.display(), "failed to rename directory");
                    }
                    continue;
                }
            } else if refresh_meta {
                if let Some(exe) = &executable {
                    if !self.try_export_meta(exe, &meta_path).await {
                        tracing::warn!(driver = %name, "meta re-export failed, keeping old meta");
                    }
                }
            }

            let Some((meta, meta_hash)) = load_meta_file(&meta_path) else {
                tracing::warn!(path = %meta_path.display(), "invalid driver meta, skipped");
                continue;
            };

            let Some(program) = executable else {
                tracing::warn!(driver = %name, "driver has meta but no conforming executable");
                continue;
            };

            let id = meta.info.id.clone();
            result.insert(
                id.clone(),
                DriverConfig { id, program, args: Vec::new(), meta: Arc::new(meta), meta_hash },
            );
            stats.updated += 1;
        }

        (result, stats)
    }

    /// Run `<exe> --export-meta=<path>` under the export timeout, with the
    /// host binary directory prepended to PATH. Returns true when the
    /// process exits zero and the file parses as a JSON object.
    async fn try_export_meta(&self, executable: &Path, meta_path: &Path) -> bool {
        let mut cmd = tokio::process::Command::new(executable);
        cmd.arg(format!("--export-meta={}", meta_path.display()))
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null());

        let bin_dir = self.host_bin_dir.clone().or_else(platform::host_bin_dir);
        if let Some(dir) = bin_dir {
            cmd.env("PATH", platform::path_with_prefix(&dir));
        }

        let Ok(mut child) = cmd.spawn() else { return false };
        let status = match tokio::time::timeout(EXPORT_TIMEOUT, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(_)) => return false,
            Err(_) => {
                let _ = child.start_kill();
                let _ = tokio::time::timeout(Duration::from_secs(1), child.wait()).await;
                return false;
            }
        };
        if !status.success() {
            return false;
        }

        let Ok(bytes) = std::fs::read(meta_path) else { return false };
        serde_json::from_slice::<serde_json::Value>(&bytes)
            .map(|v| v.is_object())
            .unwrap_or(false)
    }
}

fn load_meta_file(path: &Path) -> Option<(DriverMeta, String)> {
    let bytes = std::fs::read(path).ok()?;
    let meta: DriverMeta = serde_json::from_slice(&bytes).ok()?;
    if meta.info.id.is_empty() {
        return None;
    }
    Some((meta, meta_hash(&bytes)))
}

/// md5 hex digest over the meta file bytes.
pub(crate) fn meta_hash(bytes: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn mark_failed(dir: &Path) -> bool {
    let Some(name) = dir.file_name().and_then(|n| n.to_str()) else { return false };
    if name.ends_with(FAILED_SUFFIX) {
        return true;
    }
    let target = dir.with_file_name(format!("{name}{FAILED_SUFFIX}"));
    if target.exists() {
        return false;
    }
    std::fs::rename(dir, target).is_ok()
}

/// In-memory driver index. Replaced wholesale: readers see either the old
/// or the new map, never a partial update.
#[derive(Default)]
pub struct DriverCatalog {
    drivers: Mutex<Arc<HashMap<String, DriverConfig>>>,
}

impl DriverCatalog {
    pub fn new() -> Self {
        DriverCatalog::default()
    }

    pub fn replace_all(&self, drivers: HashMap<String, DriverConfig>) {
        *self.drivers.lock() = Arc::new(drivers);
    }

    pub fn clear(&self) {
        *self.drivers.lock() = Arc::new(HashMap::new());
    }

    /// Consistent snapshot of the current map.
    pub fn snapshot(&self) -> Arc<HashMap<String, DriverConfig>> {
        Arc::clone(&self.drivers.lock())
    }

    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.snapshot().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn get(&self, id: &str) -> Option<DriverConfig> {
        self.snapshot().get(id).cloned()
    }

    pub fn has(&self, id: &str) -> bool {
        self.snapshot().contains_key(id)
    }

    /// The driver's program file still exists on disk.
    pub fn health_check(&self, id: &str) -> bool {
        match self.snapshot().get(id) {
            Some(config) => !config.program.as_os_str().is_empty() && config.program.exists(),
            None => false,
        }
    }

    pub fn health_check_all(&self) -> HashMap<String, bool> {
        self.snapshot().keys().map(|id| (id.clone(), self.health_check(id))).collect()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}

#[cfg(test)]
#[path = "catalog_tests.rs"]
mod tests;
