// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

fn full_manifest() -> serde_json::Value {
    json!({
        "manifestVersion": "1",
        "id": "modbus-poller",
        "name": "Modbus Poller",
        "version": "0.3.1",
        "description": "Polls modbus devices",
        "author": "ops",
    })
}

#[test]
fn parses_a_complete_manifest() {
    let m = ServiceManifest::from_json(&full_manifest()).unwrap();
    assert_eq!(m.id, "modbus-poller");
    assert_eq!(m.name, "Modbus Poller");
    assert_eq!(m.version, "0.3.1");
    assert_eq!(m.description, "Polls modbus devices");
    assert_eq!(m.author, "ops");
}

#[test]
fn optional_fields_default_to_empty() {
    let m = ServiceManifest::from_json(&json!({
        "manifestVersion": "1", "id": "a", "name": "A", "version": "1.0",
    }))
    .unwrap();
    assert!(m.description.is_empty());
    assert!(m.author.is_empty());
}

#[yare::parameterized(
    unknown_key = { json!({"manifestVersion": "1", "id": "a", "name": "A", "version": "1", "license": "MIT"}), "unknown field" },
    missing_version_field = { json!({"id": "a", "name": "A", "version": "1"}), "manifestVersion" },
    wrong_manifest_version = { json!({"manifestVersion": "2", "id": "a", "name": "A", "version": "1"}), "unsupported manifestVersion" },
    missing_id = { json!({"manifestVersion": "1", "name": "A", "version": "1"}), "id" },
    empty_id = { json!({"manifestVersion": "1", "id": "", "name": "A", "version": "1"}), "id" },
    missing_name = { json!({"manifestVersion": "1", "id": "a", "version": "1"}), "name" },
    missing_version = { json!({"manifestVersion": "1", "id": "a", "name": "A"}), "version" },
    not_an_object = { json!(["x"]), "JSON object" },
)]
fn rejects_malformed_manifests(body: serde_json::Value, fragment: &str) {
    let err = ServiceManifest::from_json(&body).unwrap_err();
    assert!(err.contains(fragment), "{err} missing {fragment}");
}

#[test]
fn to_json_roundtrips() {
    let m = ServiceManifest::from_json(&full_manifest()).unwrap();
    let back = ServiceManifest::from_json(&m.to_json()).unwrap();
    assert_eq!(back, m);
}

#[test]
fn load_from_file_reports_parse_errors() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("manifest.json");
    std::fs::write(&path, "{oops").unwrap();
    let err = ServiceManifest::load_from_file(&path).unwrap_err();
    assert!(err.contains("parse error"));

    let missing = ServiceManifest::load_from_file(&dir.path().join("nope.json")).unwrap_err();
    assert!(missing.contains("cannot open"));
}
