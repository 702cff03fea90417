// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Value validation against a [`FieldMeta`] tree and default filling.
//!
//! Constraint order per field: type, numeric range, string length, pattern,
//! enum membership, array length. Error paths are dotted (`device.host`) or
//! indexed (`tags[2]`). Validation is deterministic and side-effect free.

use regex::Regex;
use serde_json::{Map, Value};

use crate::meta::{CommandMeta, FieldMeta, FieldType};

/// Stable code carried by validation failures on the HTTP surface.
pub const VALIDATION_ERROR_CODE: i32 = 400;

/// Maximum magnitude representable losslessly as a double (2^53).
const INT64_SAFE_MAX: u64 = 9_007_199_254_740_992;

/// A rejected value: the dotted/indexed path plus a human message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl std::error::Error for ValidationError {}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationError { field: field.into(), message: message.into() }
    }

    /// Prefix the error path with an enclosing object field name.
    fn nested_under(mut self, parent: &str) -> Self {
        if self.field.is_empty() {
            self.field = parent.to_string();
        } else {
            self.field = format!("{parent}.{}", self.field);
        }
        self
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.field.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{}: {}", self.field, self.message)
        }
    }
}

pub type ValidationResult = Result<(), ValidationError>;

fn check_type(value: &Value, field_type: FieldType) -> Result<(), &'static str> {
    match field_type {
        FieldType::String => {
            if !value.is_string() {
                return Err("expected string");
            }
        }
        FieldType::Int => {
            let Some(d) = value.as_f64() else { return Err("expected integer") };
            if d.fract() != 0.0 {
                return Err("expected integer, got decimal");
            }
        }
        FieldType::Int64 => {
            if !value.is_number() {
                return Err("expected integer");
            }
            let magnitude = value
                .as_i64()
                .map(i64::unsigned_abs)
                .or_else(|| value.as_u64())
                .or_else(|| value.as_f64().map(|d| d.abs() as u64));
            if magnitude.map_or(true, |m| m > INT64_SAFE_MAX) {
                return Err("integer out of safe range");
            }
        }
        FieldType::Double => {
            if !value.is_number() {
                return Err("expected number");
            }
        }
        FieldType::Bool => {
            if !value.is_boolean() {
                return Err("expected boolean");
            }
        }
        FieldType::Object => {
            if !value.is_object() {
                return Err("expected object");
            }
        }
        FieldType::Array => {
            if !value.is_array() {
                return Err("expected array");
            }
        }
        FieldType::Enum => {
            if !value.is_string() {
                return Err("expected string for enum");
            }
        }
        FieldType::Any => {}
    }
    Ok(())
}

fn check_constraints(value: &Value, field: &FieldMeta) -> ValidationResult {
    let c = &field.constraints;

    if let Some(d) = value.as_f64() {
        if let Some(min) = c.min {
            if d < min {
                return Err(ValidationError::new(&field.name, format!("value {d} < min {min}")));
            }
        }
        if let Some(max) = c.max {
            if d > max {
                return Err(ValidationError::new(&field.name, format!("value {d} > max {max}")));
            }
        }
    }

    if let Some(s) = value.as_str() {
        let len = s.chars().count();
        if let Some(min_len) = c.min_length {
            if len < min_len {
                return Err(ValidationError::new(&field.name, "string too short"));
            }
        }
        if let Some(max_len) = c.max_length {
            if len > max_len {
                return Err(ValidationError::new(&field.name, "string too long"));
            }
        }
        if !c.pattern.is_empty() {
            let re = Regex::new(&c.pattern).map_err(|_| {
                ValidationError::new(&field.name, format!("invalid pattern: {}", c.pattern))
            })?;
            if !re.is_match(s) {
                return Err(ValidationError::new(&field.name, "pattern mismatch"));
            }
        }
    }

    if field.field_type == FieldType::Enum
        && !c.enum_values.is_empty()
        && !c.enum_values.contains(value)
    {
        return Err(ValidationError::new(&field.name, "invalid enum value"));
    }

    if let Some(arr) = value.as_array() {
        if let Some(min_items) = c.min_items {
            if arr.len() < min_items {
                return Err(ValidationError::new(&field.name, "array too short"));
            }
        }
        if let Some(max_items) = c.max_items {
            if arr.len() > max_items {
                return Err(ValidationError::new(&field.name, "array too long"));
            }
        }
    }

    Ok(())
}

/// Validate one value against one field descriptor, recursing into object
/// children and array item schemas.
pub fn validate_field(value: &Value, field: &FieldMeta) -> ValidationResult {
    check_type(value, field.field_type)
        .map_err(|msg| ValidationError::new(&field.name, msg))?;

    check_constraints(value, field)?;

    if field.field_type == FieldType::Object && !field.fields.is_empty() {
        if let Some(obj) = value.as_object() {
            validate_object(
                obj,
                &field.fields,
                &field.required_keys,
                field.additional_properties,
            )
            .map_err(|e| e.nested_under(&field.name))?;
        }
    }

    if field.field_type == FieldType::Array {
        if let (Some(arr), Some(items)) = (value.as_array(), field.items.as_deref()) {
            for (i, element) in arr.iter().enumerate() {
                validate_field(element, items).map_err(|mut e| {
                    e.field = format!("{}[{i}]", field.name);
                    e
                })?;
            }
        }
    }

    Ok(())
}

/// Validate an object against a field list: required fields, required keys,
/// per-field checks, then unknown-key rejection when `allow_unknown` is
/// false. A required field is unsatisfied both when its key is absent and
/// when its value is an empty string.
pub fn validate_object(
    obj: &Map<String, Value>,
    fields: &[FieldMeta],
    required_keys: &[String],
    allow_unknown: bool,
) -> ValidationResult {
    for field in fields {
        if !field.required {
            continue;
        }
        match obj.get(&field.name) {
            None => return Err(ValidationError::new(&field.name, "required field missing")),
            Some(Value::String(s)) if s.is_empty() => {
                return Err(ValidationError::new(&field.name, "required field cannot be empty"))
            }
            Some(_) => {}
        }
    }

    for key in required_keys {
        if !obj.contains_key(key) {
            return Err(ValidationError::new(key, "required key missing"));
        }
    }

    for field in fields {
        if let Some(value) = obj.get(&field.name) {
            validate_field(value, field)?;
        }
    }

    if !allow_unknown {
        for key in obj.keys() {
            if !fields.iter().any(|f| &f.name == key) {
                return Err(ValidationError::new(key, "unknown field"));
            }
        }
    }

    Ok(())
}

/// Validate a command's `data` value against its parameter descriptors.
/// Absent/null data validates as an empty object.
pub fn validate_params(
    data: Option<&Value>,
    cmd: &CommandMeta,
    allow_unknown: bool,
) -> ValidationResult {
    let empty = Map::new();
    let obj = match data {
        None | Some(Value::Null) => &empty,
        Some(Value::Object(obj)) => obj,
        Some(_) => return Err(ValidationError::new("", "params must be an object")),
    };
    validate_object(obj, &cmd.params, &[], allow_unknown)
}

/// Validate a config object against top-level schema fields, tolerating
/// unknown keys (deep config is user-controlled).
pub fn validate_config_fields(config: &Map<String, Value>, fields: &[FieldMeta]) -> ValidationResult {
    validate_object(config, fields, &[], true)
}

/// Produce a new object where every missing key whose descriptor carries a
/// non-null default is populated. Present keys are never overwritten;
/// object fields recurse so nested defaults materialize. Idempotent.
pub fn fill_defaults(data: &Map<String, Value>, fields: &[FieldMeta]) -> Map<String, Value> {
    let mut result = data.clone();
    for field in fields {
        if !result.contains_key(&field.name) && !field.default_value.is_null() {
            result.insert(field.name.clone(), field.default_value.clone());
        }
        if field.field_type == FieldType::Object && !field.fields.is_empty() {
            if let Some(Value::Object(inner)) = result.get(&field.name) {
                let filled = fill_defaults(inner, &field.fields);
                result.insert(field.name.clone(), Value::Object(filled));
            }
        }
    }
    result
}

#[cfg(test)]
#[path = "validate_tests.rs"]
mod tests;
