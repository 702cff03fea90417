// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::meta::{CommandMeta, Constraints, FieldMeta, FieldType};
use serde_json::{json, Map, Value};

fn field(name: &str, field_type: FieldType) -> FieldMeta {
    FieldMeta::named(name, field_type)
}

fn obj(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {other}"),
    }
}

#[yare::parameterized(
    string_ok = { FieldType::String, json!("x"), true },
    string_bad = { FieldType::String, json!(1), false },
    int_ok = { FieldType::Int, json!(7), true },
    int_whole_double_ok = { FieldType::Int, json!(7.0), true },
    int_decimal_bad = { FieldType::Int, json!(7.5), false },
    int_string_bad = { FieldType::Int, json!("7"), false },
    int64_ok = { FieldType::Int64, json!(9007199254740992u64), true },
    int64_over_bad = { FieldType::Int64, json!(9007199254740993u64), false },
    double_ok = { FieldType::Double, json!(1.5), true },
    bool_ok = { FieldType::Bool, json!(true), true },
    bool_bad = { FieldType::Bool, json!("true"), false },
    object_ok = { FieldType::Object, json!({}), true },
    array_ok = { FieldType::Array, json!([]), true },
    enum_needs_string = { FieldType::Enum, json!(3), false },
    any_accepts_everything = { FieldType::Any, json!([1, {"a": 2}]), true },
)]
fn type_checks(field_type: FieldType, value: Value, ok: bool) {
    let f = field("f", field_type);
    assert_eq!(validate_field(&value, &f).is_ok(), ok);
}

#[test]
fn numeric_range_constraints() {
    let mut f = field("port", FieldType::Int);
    f.constraints = Constraints { min: Some(1.0), max: Some(65535.0), ..Constraints::default() };

    assert!(validate_field(&json!(8080), &f).is_ok());

    let err = validate_field(&json!(0), &f).unwrap_err();
    assert_eq!(err.field, "port");
    assert!(err.message.contains("< min"));

    let err = validate_field(&json!(70000), &f).unwrap_err();
    assert!(err.message.contains("> max"));
}

#[test]
fn string_length_and_pattern() {
    let mut f = field("host", FieldType::String);
    f.constraints = Constraints {
        min_length: Some(1),
        max_length: Some(16),
        pattern: "^[0-9.]+$".to_string(),
        ..Constraints::default()
    };

    assert!(validate_field(&json!("10.0.0.1"), &f).is_ok());
    assert_eq!(validate_field(&json!(""), &f).unwrap_err().message, "string too short");
    assert_eq!(
        validate_field(&json!("aaaaaaaaaaaaaaaaa"), &f).unwrap_err().message,
        "string too long"
    );
    assert_eq!(validate_field(&json!("not-an-ip"), &f).unwrap_err().message, "pattern mismatch");
}

#[test]
fn invalid_pattern_is_a_validation_failure_not_a_panic() {
    let mut f = field("x", FieldType::String);
    f.constraints.pattern = "[unclosed".to_string();
    let err = validate_field(&json!("anything"), &f).unwrap_err();
    assert!(err.message.contains("invalid pattern"));
}

#[test]
fn enum_membership() {
    let mut f = field("mode", FieldType::Enum);
    f.constraints.enum_values = vec![json!("rtu"), json!("tcp")];

    assert!(validate_field(&json!("tcp"), &f).is_ok());
    assert_eq!(validate_field(&json!("udp"), &f).unwrap_err().message, "invalid enum value");
}

#[test]
fn array_length_and_item_schema() {
    let mut f = field("tags", FieldType::Array);
    f.constraints = Constraints { min_items: Some(1), max_items: Some(3), ..Constraints::default() };
    f.items = Some(Box::new(field("", FieldType::String)));

    assert!(validate_field(&json!(["a", "b"]), &f).is_ok());
    assert_eq!(validate_field(&json!([]), &f).unwrap_err().message, "array too short");
    assert_eq!(
        validate_field(&json!(["a", "b", "c", "d"]), &f).unwrap_err().message,
        "array too long"
    );

    let err = validate_field(&json!(["a", 2, "c"]), &f).unwrap_err();
    assert_eq!(err.field, "tags[1]");
}

#[test]
fn nested_object_errors_use_dotted_paths() {
    let mut device = field("device", FieldType::Object);
    device.fields = vec![
        FieldMeta { required: true, ..field("host", FieldType::String) },
        field("port", FieldType::Int),
    ];

    let err = validate_field(&json!({"port": 502}), &device).unwrap_err();
    assert_eq!(err.field, "device.host");
    assert_eq!(err.message, "required field missing");

    let err = validate_field(&json!({"host": "h", "port": "x"}), &device).unwrap_err();
    assert_eq!(err.field, "device.port");
}

#[test]
fn required_string_fields_reject_empty_values() {
    let mut device = field("device", FieldType::Object);
    device.fields = vec![
        FieldMeta { required: true, ..field("host", FieldType::String) },
        field("note", FieldType::String),
    ];

    // No length constraint: emptiness alone leaves a required field
    // unsatisfied.
    let err = validate_field(&json!({"host": ""}), &device).unwrap_err();
    assert_eq!(err.field, "device.host");
    assert_eq!(err.message, "required field cannot be empty");

    // Optional fields may be empty.
    assert!(validate_field(&json!({"host": "h", "note": ""}), &device).is_ok());
}

#[test]
fn required_keys_are_cross_checked() {
    let fields = vec![field("a", FieldType::Any)];
    let required = vec!["token".to_string()];
    let err = validate_object(&obj(json!({"a": 1})), &fields, &required, true).unwrap_err();
    assert_eq!(err.field, "token");
    assert_eq!(err.message, "required key missing");
}

#[test]
fn unknown_fields_rejected_when_additional_properties_disallowed() {
    let fields = vec![field("a", FieldType::Int)];
    assert!(validate_object(&obj(json!({"a": 1, "b": 2})), &fields, &[], true).is_ok());

    let err = validate_object(&obj(json!({"a": 1, "b": 2})), &fields, &[], false).unwrap_err();
    assert_eq!(err.field, "b");
    assert_eq!(err.message, "unknown field");
}

#[test]
fn constraint_order_type_comes_first() {
    let mut f = field("n", FieldType::Int);
    f.constraints.min = Some(10.0);
    // A wrong type reports the type error, not the range error.
    assert_eq!(validate_field(&json!("5"), &f).unwrap_err().message, "expected integer");
}

#[test]
fn validate_params_accepts_absent_and_null_data() {
    let cmd = CommandMeta {
        name: "ping".to_string(),
        params: vec![field("echo", FieldType::String)],
        ..CommandMeta::default()
    };
    assert!(validate_params(None, &cmd, true).is_ok());
    assert!(validate_params(Some(&Value::Null), &cmd, true).is_ok());
    assert!(validate_params(Some(&json!([1])), &cmd, true).is_err());

    let mut cmd = cmd;
    cmd.params[0].required = true;
    assert!(validate_params(None, &cmd, true).is_err());
}

#[test]
fn fill_defaults_populates_missing_keys_only() {
    let fields = vec![
        FieldMeta { default_value: json!(502), ..field("port", FieldType::Int) },
        FieldMeta { default_value: json!("0.0.0.0"), ..field("host", FieldType::String) },
        field("name", FieldType::String), // null default: never filled
    ];

    let filled = fill_defaults(&obj(json!({"host": "10.0.0.1"})), &fields);
    assert_eq!(filled.get("port"), Some(&json!(502)));
    assert_eq!(filled.get("host"), Some(&json!("10.0.0.1")));
    assert!(!filled.contains_key("name"));
}

#[test]
fn fill_defaults_recurses_into_present_objects() {
    let mut device = field("device", FieldType::Object);
    device.fields = vec![
        FieldMeta { required: true, ..field("host", FieldType::String) },
        FieldMeta { default_value: json!(502), ..field("port", FieldType::Int) },
    ];

    let filled = fill_defaults(&obj(json!({"device": {"host": "10.0.0.1"}})), &[device]);
    assert_eq!(filled["device"]["port"], json!(502));
    assert_eq!(filled["device"]["host"], json!("10.0.0.1"));
}

#[test]
fn fill_defaults_is_idempotent_and_preserves_present_keys() {
    let mut device = field("device", FieldType::Object);
    device.fields = vec![FieldMeta { default_value: json!(502), ..field("port", FieldType::Int) }];
    let fields = vec![device, FieldMeta { default_value: json!(true), ..field("on", FieldType::Bool) }];

    let input = obj(json!({"device": {"port": 1502}}));
    let once = fill_defaults(&input, &fields);
    let twice = fill_defaults(&once, &fields);
    assert_eq!(once, twice);
    assert_eq!(once["device"]["port"], json!(1502));
}

#[test]
fn validation_error_displays_path_and_message() {
    let err = ValidationError::new("device.host", "required field missing");
    assert_eq!(err.to_string(), "device.host: required field missing");
    assert_eq!(VALIDATION_ERROR_CODE, 400);

    let bare = ValidationError::new("", "params must be an object");
    assert_eq!(bare.to_string(), "params must be an object");
}
