// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Platform conventions: driver executable discovery and PATH handling.

use std::path::{Path, PathBuf};

/// Driver executables are named `driver_<something>` so stray binaries in
/// a driver directory are never launched by accident.
pub const DRIVER_EXECUTABLE_PREFIX: &str = "driver_";

#[cfg(unix)]
pub fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
pub fn is_executable(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("exe"))
            .unwrap_or(false)
}

/// Find the conforming driver executable in a directory: prefix match on
/// the file stem plus the platform executability check. Non-conforming
/// executables are skipped with a warning.
pub fn find_driver_executable(dir: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    let mut candidates: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| is_executable(p))
        .collect();
    candidates.sort();

    for path in candidates {
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
        if stem.starts_with(DRIVER_EXECUTABLE_PREFIX) {
            return Some(path);
        }
        tracing::warn!(
            file = %path.display(),
            prefix = DRIVER_EXECUTABLE_PREFIX,
            "executable does not match the driver prefix, skipped"
        );
    }
    None
}

/// Directory holding the host binary; prepended to children's PATH so they
/// resolve host-shipped tools first.
pub fn host_bin_dir() -> Option<PathBuf> {
    std::env::current_exe().ok().and_then(|p| p.parent().map(Path::to_path_buf))
}

/// Compute a PATH value with `dir` prepended to the current one.
pub fn path_with_prefix(dir: &Path) -> std::ffi::OsString {
    let mut parts = vec![dir.to_path_buf()];
    if let Some(existing) = std::env::var_os("PATH") {
        parts.extend(std::env::split_paths(&existing));
    }
    std::env::join_paths(parts).unwrap_or_else(|_| dir.as_os_str().to_os_string())
}
