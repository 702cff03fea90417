// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use serde_json::json;

#[yare::parameterized(
    string = { "string", FieldType::String },
    int = { "int", FieldType::Int },
    integer_alias = { "integer", FieldType::Int },
    int64 = { "int64", FieldType::Int64 },
    double = { "double", FieldType::Double },
    number_alias = { "number", FieldType::Double },
    bool_ = { "bool", FieldType::Bool },
    boolean_alias = { "boolean", FieldType::Bool },
    object = { "object", FieldType::Object },
    array = { "array", FieldType::Array },
    enum_ = { "enum", FieldType::Enum },
    any = { "any", FieldType::Any },
)]
fn field_type_parses_known_strings(input: &str, expected: FieldType) {
    assert_eq!(FieldType::parse(input), Some(expected));
}

#[test]
fn field_type_rejects_unknown_strings() {
    assert_eq!(FieldType::parse("blob"), None);
    let err = serde_json::from_value::<FieldType>(json!("blob")).unwrap_err();
    assert!(err.to_string().contains("unknown field type"));
}

#[test]
fn field_meta_deserializes_nested_tree() {
    let meta: FieldMeta = serde_json::from_value(json!({
        "name": "device",
        "type": "object",
        "required": true,
        "requiredKeys": ["host"],
        "additionalProperties": false,
        "fields": [
            {"name": "host", "type": "string", "required": true},
            {"name": "port", "type": "int", "default": 502},
        ],
    }))
    .unwrap();

    assert_eq!(meta.field_type, FieldType::Object);
    assert!(meta.required);
    assert!(!meta.additional_properties);
    assert_eq!(meta.required_keys, vec!["host"]);
    assert_eq!(meta.fields.len(), 2);
    assert_eq!(meta.fields[1].default_value, json!(502));
}

#[test]
fn additional_properties_defaults_to_allowed() {
    let meta: FieldMeta =
        serde_json::from_value(json!({"name": "x", "type": "object"})).unwrap();
    assert!(meta.additional_properties);
}

#[test]
fn constraints_accept_enum_values_alias() {
    let c: Constraints =
        serde_json::from_value(json!({"enumValues": ["a", "b"]})).unwrap();
    assert_eq!(c.enum_values, vec![json!("a"), json!("b")]);

    let c: Constraints = serde_json::from_value(json!({"enum": ["x"]})).unwrap();
    assert_eq!(c.enum_values, vec![json!("x")]);
}

#[test]
fn array_field_carries_item_schema() {
    let meta: FieldMeta = serde_json::from_value(json!({
        "name": "tags",
        "type": "array",
        "items": {"type": "string", "constraints": {"minLength": 1}},
        "constraints": {"maxItems": 8},
    }))
    .unwrap();

    let items = meta.items.as_deref().unwrap();
    assert_eq!(items.field_type, FieldType::String);
    assert_eq!(items.constraints.min_length, Some(1));
    assert_eq!(meta.constraints.max_items, Some(8));
}

#[test]
fn driver_meta_roundtrips() {
    let meta = DriverMeta {
        info: DriverInfo {
            id: "com.example.modbus".to_string(),
            name: "Modbus Driver".to_string(),
            version: "1.2.0".to_string(),
            vendor: "Example".to_string(),
            ..DriverInfo::default()
        },
        commands: vec![CommandMeta {
            name: "read".to_string(),
            params: vec![FieldMeta::named("address", FieldType::Int)],
            ..CommandMeta::default()
        }],
        ..DriverMeta::default()
    };

    let value = serde_json::to_value(&meta).unwrap();
    assert_eq!(value["schemaVersion"], "1.0");
    assert_eq!(value["info"]["id"], "com.example.modbus");

    let parsed: DriverMeta = serde_json::from_value(value).unwrap();
    assert_eq!(parsed, meta);
}

#[test]
fn find_command_by_name() {
    let meta = DriverMeta {
        commands: vec![
            CommandMeta { name: "scan".to_string(), ..CommandMeta::default() },
            CommandMeta { name: "read".to_string(), ..CommandMeta::default() },
        ],
        ..DriverMeta::default()
    };
    assert_eq!(meta.find_command("read").map(|c| c.name.as_str()), Some("read"));
    assert!(meta.find_command("write").is_none());
}

#[test]
fn driver_meta_tolerates_missing_sections() {
    let meta: DriverMeta =
        serde_json::from_value(json!({"info": {"id": "d1"}})).unwrap();
    assert_eq!(meta.info.id, "d1");
    assert_eq!(meta.schema_version, "1.0");
    assert!(meta.commands.is_empty());
}
