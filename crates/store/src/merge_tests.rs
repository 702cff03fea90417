// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::schema::ServiceConfigSchema;
use serde_json::{json, Map, Value};

fn obj(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

fn device_schema() -> ServiceConfigSchema {
    ServiceConfigSchema::from_json(&json!({
        "device": {
            "type": "object",
            "required": true,
            "fields": {
                "host": {"type": "string", "required": true},
                "port": {"type": "int", "default": 502},
            },
        },
    }))
    .unwrap()
}

#[test]
fn deep_merge_merges_objects_and_replaces_arrays() {
    let base = obj(json!({"a": {"x": 1, "y": 2}, "list": [1, 2, 3], "keep": true}));
    let over = obj(json!({"a": {"y": 9, "z": 3}, "list": [7]}));

    let merged = deep_merge(&base, &over);
    assert_eq!(Value::Object(merged), json!({
        "a": {"x": 1, "y": 9, "z": 3},
        "list": [7],
        "keep": true,
    }));
}

#[test]
fn valid_config_gains_nested_defaults() {
    let merged = merge_and_validate(
        &device_schema(),
        &obj(json!({"device": {"host": "10.0.0.1"}})),
        &Map::new(),
        UnknownFieldPolicy::Reject,
    )
    .unwrap();

    assert_eq!(merged["device"]["port"], json!(502));
    assert_eq!(merged["device"]["host"], json!("10.0.0.1"));
}

#[test]
fn empty_required_string_fails_with_dotted_path() {
    let err = merge_and_validate(
        &device_schema(),
        &obj(json!({"device": {"host": ""}})),
        &Map::new(),
        UnknownFieldPolicy::Reject,
    )
    .unwrap_err();

    assert_eq!(err.field, "device.host");
}

#[test]
fn unknown_top_level_key_is_rejected() {
    let err = merge_and_validate(
        &device_schema(),
        &obj(json!({"device": {"host": "x"}, "extra": 1})),
        &Map::new(),
        UnknownFieldPolicy::Reject,
    )
    .unwrap_err();

    assert_eq!(err.field, "extra");
    assert_eq!(err.message, "unknown configuration field");
}

#[test]
fn unknown_nested_key_reports_full_path() {
    let err = merge_and_validate(
        &device_schema(),
        &obj(json!({"device": {"host": "x", "color": "red"}})),
        &Map::new(),
        UnknownFieldPolicy::Reject,
    )
    .unwrap_err();

    assert_eq!(err.field, "device.color");
}

#[test]
fn allow_policy_passes_unknown_keys_through() {
    let merged = merge_and_validate(
        &device_schema(),
        &obj(json!({"device": {"host": "x"}, "extra": {"anything": true}})),
        &Map::new(),
        UnknownFieldPolicy::Allow,
    )
    .unwrap();

    assert_eq!(merged["extra"], json!({"anything": true}));
}

#[test]
fn cli_values_override_file_values() {
    let schema = ServiceConfigSchema::from_json(&json!({
        "port": {"type": "int", "default": 502},
        "verbose": {"type": "bool"},
    }))
    .unwrap();

    let merged = merge_and_validate(
        &schema,
        &obj(json!({"port": 1502})),
        &obj(json!({"port": "8080", "verbose": "true"})),
        UnknownFieldPolicy::Reject,
    )
    .unwrap();

    // Raw CLI strings are normalized to the schema types and win.
    assert_eq!(merged["port"], json!(8080));
    assert_eq!(merged["verbose"], json!(true));
}

#[yare::parameterized(
    int_value = { json!({"n": {"type": "int"}}), "n", "42", json!(42) },
    double_value = { json!({"n": {"type": "double"}}), "n", "2.5", json!(2.5) },
    bool_true = { json!({"b": {"type": "bool"}}), "b", "true", json!(true) },
    string_kept = { json!({"s": {"type": "string"}}), "s", "8080", json!("8080") },
    array_literal = { json!({"a": {"type": "array"}}), "a", "[1,2]", json!([1, 2]) },
    object_literal = { json!({"o": {"type": "object"}}), "o", "{\"k\":1}", json!({"k": 1}) },
    any_number = { json!({"x": {"type": "any"}}), "x", "3", json!(3) },
    any_text = { json!({"x": {"type": "any"}}), "x", "plain", json!("plain") },
)]
fn raw_string_normalization(schema: Value, key: &str, raw: &str, expected: Value) {
    let schema = ServiceConfigSchema::from_json(&schema).unwrap();
    let merged = merge_and_validate(
        &schema,
        &Map::new(),
        &obj(json!({key: raw})),
        UnknownFieldPolicy::Allow,
    )
    .unwrap();
    assert_eq!(merged[key], expected);
}

#[test]
fn failed_conversion_keeps_raw_string_and_fails_validation() {
    let schema = ServiceConfigSchema::from_json(&json!({"n": {"type": "int"}})).unwrap();
    let err = merge_and_validate(
        &schema,
        &Map::new(),
        &obj(json!({"n": "not-a-number"})),
        UnknownFieldPolicy::Reject,
    )
    .unwrap_err();
    assert_eq!(err.field, "n");
    assert!(err.message.contains("expected integer"));
}

#[test]
fn missing_required_field_reports_by_name() {
    let err = merge_and_validate(
        &device_schema(),
        &Map::new(),
        &Map::new(),
        UnknownFieldPolicy::Reject,
    )
    .unwrap_err();
    assert_eq!(err.field, "device");
    assert!(err.message.contains("is missing"));
}

#[test]
fn pipeline_is_deterministic() {
    let file = obj(json!({"device": {"host": "h"}}));
    let once = merge_and_validate(&device_schema(), &file, &Map::new(), UnknownFieldPolicy::Reject)
        .unwrap();
    let twice =
        merge_and_validate(&device_schema(), &once, &Map::new(), UnknownFieldPolicy::Reject)
            .unwrap();
    assert_eq!(once, twice);
}
