// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed descriptor of a driver: info, commands, parameters, constraints
//! and UI hints.
//!
//! Field metadata forms a finite tree: objects nest `fields`, arrays carry
//! an `items` schema. Shared subtrees are not modeled; children are owned.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Value type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FieldType {
    String,
    /// 32-bit integer; rejects non-integral doubles.
    Int,
    /// 64-bit integer; limited to the 2^53 safe range.
    Int64,
    Double,
    Bool,
    Object,
    Array,
    /// String constrained by an explicit value set.
    Enum,
    #[default]
    Any,
}

impl FieldType {
    /// Parse a type string. Accepts the JS-style aliases `integer`,
    /// `number` and `boolean`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "string" => Some(FieldType::String),
            "int" | "integer" => Some(FieldType::Int),
            "int64" => Some(FieldType::Int64),
            "double" | "number" => Some(FieldType::Double),
            "bool" | "boolean" => Some(FieldType::Bool),
            "object" => Some(FieldType::Object),
            "array" => Some(FieldType::Array),
            "enum" => Some(FieldType::Enum),
            "any" => Some(FieldType::Any),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Int => "int",
            FieldType::Int64 => "int64",
            FieldType::Double => "double",
            FieldType::Bool => "bool",
            FieldType::Object => "object",
            FieldType::Array => "array",
            FieldType::Enum => "enum",
            FieldType::Any => "any",
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for FieldType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for FieldType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        FieldType::parse(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown field type \"{s}\"")))
    }
}

/// Rendering hints for form generators. Carried verbatim; the core never
/// interprets these.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UiHint {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub widget: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub group: String,
    #[serde(skip_serializing_if = "is_zero_i32")]
    pub order: i32,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub placeholder: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub advanced: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub readonly: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub visible_if: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub unit: String,
    #[serde(skip_serializing_if = "is_zero_f64")]
    pub step: f64,
}

fn is_zero_i32(v: &i32) -> bool {
    *v == 0
}

fn is_zero_f64(v: &f64) -> bool {
    *v == 0.0
}

/// Optional per-field bounds.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Constraints {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub pattern: String,
    /// Allowed values for `enum` fields. `enumValues` is accepted as an
    /// alias used by schema authors.
    #[serde(rename = "enum", alias = "enumValues", skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<Value>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_items: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_items: Option<usize>,
}

impl Constraints {
    pub fn is_empty(&self) -> bool {
        self == &Constraints::default()
    }
}

/// Metadata for one field of a command parameter set or config schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FieldMeta {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
    #[serde(rename = "default", skip_serializing_if = "Value::is_null")]
    pub default_value: Value,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(skip_serializing_if = "Constraints::is_empty")]
    pub constraints: Constraints,
    #[serde(skip_serializing_if = "is_default_ui")]
    pub ui: UiHint,
    /// Nested fields when `type == object`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldMeta>,
    /// Element schema when `type == array`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<FieldMeta>>,
    /// Keys that must be present on an object value, beyond `required`
    /// child fields.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub required_keys: Vec<String>,
    /// When false, object values reject keys not named in `fields`.
    #[serde(default = "default_true")]
    pub additional_properties: bool,
}

fn is_default_ui(ui: &UiHint) -> bool {
    ui == &UiHint::default()
}

fn default_true() -> bool {
    true
}

impl Default for FieldMeta {
    fn default() -> Self {
        FieldMeta {
            name: String::new(),
            field_type: FieldType::Any,
            required: false,
            default_value: Value::Null,
            description: String::new(),
            constraints: Constraints::default(),
            ui: UiHint::default(),
            fields: Vec::new(),
            items: None,
            required_keys: Vec::new(),
            additional_properties: true,
        }
    }
}

impl FieldMeta {
    pub fn named(name: impl Into<String>, field_type: FieldType) -> Self {
        FieldMeta { name: name.into(), field_type, ..FieldMeta::default() }
    }
}

/// Metadata for an event a command may emit.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EventMeta {
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldMeta>,
}

/// Metadata for a command's return value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReturnMeta {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldMeta>,
}

impl Default for ReturnMeta {
    fn default() -> Self {
        ReturnMeta { field_type: FieldType::Object, description: String::new(), fields: Vec::new() }
    }
}

/// Metadata for one named command.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CommandMeta {
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub summary: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<FieldMeta>,
    pub returns: ReturnMeta,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<EventMeta>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<Value>,
    #[serde(skip_serializing_if = "is_default_ui")]
    pub ui: UiHint,
}

/// How a driver wants its configuration injected at launch.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConfigApply {
    /// One of `startupArgs`, `env`, `command`, `file`.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub method: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub env_prefix: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub command: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub file_name: String,
}

/// A driver's configuration schema: field descriptors plus the injection
/// method.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConfigSchema {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<FieldMeta>,
    pub apply: ConfigApply,
}

impl ConfigSchema {
    pub fn find_field(&self, name: &str) -> Option<&FieldMeta> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Basic driver identity.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DriverInfo {
    pub id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub vendor: String,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub entry: Value,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub capabilities: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub profiles: Vec<String>,
}

/// Top-level driver descriptor, exported via `--export-meta` or answered to
/// `meta.describe`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DriverMeta {
    pub schema_version: String,
    pub info: DriverInfo,
    pub config: ConfigSchema,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub commands: Vec<CommandMeta>,
    /// Shared type registry referenced by name from field descriptors.
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub types: HashMap<String, FieldMeta>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<Value>,
}

impl Default for DriverMeta {
    fn default() -> Self {
        DriverMeta {
            schema_version: "1.0".to_string(),
            info: DriverInfo::default(),
            config: ConfigSchema::default(),
            commands: Vec::new(),
            types: HashMap::new(),
            errors: Vec::new(),
            examples: Vec::new(),
        }
    }
}

impl DriverMeta {
    pub fn find_command(&self, name: &str) -> Option<&CommandMeta> {
        self.commands.iter().find(|c| c.name == name)
    }
}

#[cfg(test)]
#[path = "meta_tests.rs"]
mod tests;
