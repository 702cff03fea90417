// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::os::unix::fs::PermissionsExt;

fn write_executable(path: &Path, body: &str) {
    std::fs::write(path, body).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

fn meta_json(id: &str) -> String {
    format!(r#"{{"schemaVersion":"1.0","info":{{"id":"{id}","name":"{id}","version":"1.0.0"}}}}"#)
}

/// Driver dir with a pre-existing meta file and a conforming executable.
fn make_driver_dir(root: &Path, dir_name: &str, id: &str) -> PathBuf {
    let dir = root.join(dir_name);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("driver.meta.json"), meta_json(id)).unwrap();
    write_executable(&dir.join(format!("driver_{id}")), "#!/bin/sh\nexit 0\n");
    dir
}

#[tokio::test]
async fn scan_loads_drivers_with_existing_meta() {
    let root = tempfile::tempdir().unwrap();
    make_driver_dir(root.path(), "alpha", "alpha");
    make_driver_dir(root.path(), "beta", "beta");

    let scanner = DriverScanner::new();
    let (drivers, stats) = scanner.scan(root.path(), false).await;

    assert_eq!(stats, ScanStats { scanned: 2, updated: 2, newly_failed: 0, skipped_failed: 0 });
    assert_eq!(drivers.len(), 2);
    assert_eq!(drivers["alpha"].meta.info.id, "alpha");
    assert!(drivers["alpha"].program.ends_with("driver_alpha"));
}

#[tokio::test]
async fn failed_directories_are_skipped() {
    let root = tempfile::tempdir().unwrap();
    make_driver_dir(root.path(), "ok", "ok");
    std::fs::create_dir_all(root.path().join("broken.failed")).unwrap();

    let scanner = DriverScanner::new();
    let (drivers, stats) = scanner.scan(root.path(), false).await;

    assert_eq!(stats.skipped_failed, 1);
    assert_eq!(stats.scanned, 1);
    assert_eq!(drivers.len(), 1);
}

#[tokio::test]
async fn missing_meta_triggers_export() {
    let root = tempfile::tempdir().unwrap();
    let dir = root.path().join("exporter");
    std::fs::create_dir_all(&dir).unwrap();
    // Stub that honors --export-meta=<path>.
    write_executable(
        &dir.join("driver_exporter"),
        &format!(
            "#!/bin/sh\npath=\"${{1#--export-meta=}}\"\nprintf '%s' '{}' > \"$path\"\n",
            meta_json("exporter")
        ),
    );

    let scanner = DriverScanner::new();
    let (drivers, stats) = scanner.scan(root.path(), false).await;

    assert_eq!(stats.updated, 1);
    assert_eq!(stats.newly_failed, 0);
    assert!(drivers.contains_key("exporter"));
    assert!(dir.join("driver.meta.json").exists());
}

#[tokio::test]
async fn export_failure_quarantines_the_directory() {
    let root = tempfile::tempdir().unwrap();
    let dir = root.path().join("crasher");
    std::fs::create_dir_all(&dir).unwrap();
    write_executable(&dir.join("driver_crasher"), "#!/bin/sh\nexit 1\n");

    let scanner = DriverScanner::new();
    let (drivers, stats) = scanner.scan(root.path(), false).await;

    assert!(drivers.is_empty());
    assert_eq!(stats.newly_failed, 1);
    assert!(!dir.exists());
    assert!(root.path().join("crasher.failed").exists());
}

#[tokio::test]
async fn directory_without_executable_and_meta_is_quarantined() {
    let root = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(root.path().join("empty")).unwrap();

    let scanner = DriverScanner::new();
    let (_, stats) = scanner.scan(root.path(), false).await;

    assert_eq!(stats.newly_failed, 1);
    assert!(root.path().join("empty.failed").exists());
}

#[tokio::test]
async fn invalid_meta_excludes_without_quarantine() {
    let root = tempfile::tempdir().unwrap();
    let dir = root.path().join("badmeta");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("driver.meta.json"), "{not json").unwrap();
    write_executable(&dir.join("driver_badmeta"), "#!/bin/sh\nexit 0\n");

    let scanner = DriverScanner::new();
    let (drivers, stats) = scanner.scan(root.path(), false).await;

    assert!(drivers.is_empty());
    assert_eq!(stats.newly_failed, 0);
    assert!(dir.exists()); // stays in place
}

#[tokio::test]
async fn refresh_failure_keeps_previous_meta() {
    let root = tempfile::tempdir().unwrap();
    let dir = root.path().join("stale");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("driver.meta.json"), meta_json("stale")).unwrap();
    // Executable whose re-export always fails.
    write_executable(&dir.join("driver_stale"), "#!/bin/sh\nexit 1\n");

    let scanner = DriverScanner::new();
    let (drivers, stats) = scanner.scan(root.path(), true).await;

    assert_eq!(stats.updated, 1);
    assert_eq!(drivers["stale"].meta.info.id, "stale");
}

#[tokio::test]
async fn meta_without_id_is_rejected() {
    let root = tempfile::tempdir().unwrap();
    let dir = root.path().join("anon");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("driver.meta.json"), r#"{"info":{"id":""}}"#).unwrap();
    write_executable(&dir.join("driver_anon"), "#!/bin/sh\nexit 0\n");

    let scanner = DriverScanner::new();
    let (drivers, _) = scanner.scan(root.path(), false).await;
    assert!(drivers.is_empty());
}

#[test]
fn meta_hash_is_md5_hex_of_bytes() {
    // md5("") and md5("abc") are fixed reference values.
    assert_eq!(meta_hash(b""), "d41d8cd98f00b204e9800998ecf8427e");
    assert_eq!(meta_hash(b"abc"), "900150983cd24fb0d6963f7d28e17f72");
}

#[tokio::test]
async fn catalog_swap_is_atomic_per_snapshot() {
    let root = tempfile::tempdir().unwrap();
    make_driver_dir(root.path(), "one", "one");
    let scanner = DriverScanner::new();
    let (first, _) = scanner.scan(root.path(), false).await;

    let catalog = DriverCatalog::new();
    catalog.replace_all(first);

    let before = catalog.snapshot();
    make_driver_dir(root.path(), "two", "two");
    let (second, _) = scanner.scan(root.path(), false).await;
    catalog.replace_all(second);

    // Old snapshot is untouched; new reads see the new map.
    assert_eq!(before.len(), 1);
    assert_eq!(catalog.list(), vec!["one".to_string(), "two".to_string()]);
    assert!(catalog.has("two"));
}

#[tokio::test]
async fn health_check_tracks_program_existence() {
    let root = tempfile::tempdir().unwrap();
    let dir = make_driver_dir(root.path(), "hc", "hc");

    let scanner = DriverScanner::new();
    let (drivers, _) = scanner.scan(root.path(), false).await;
    let catalog = DriverCatalog::new();
    catalog.replace_all(drivers);

    assert!(catalog.health_check("hc"));
    std::fs::remove_file(dir.join("driver_hc")).unwrap();
    assert!(!catalog.health_check("hc"));
    assert!(!catalog.health_check("missing"));

    let all = catalog.health_check_all();
    assert_eq!(all.get("hc"), Some(&false));
}
