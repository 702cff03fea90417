// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Configuration merge pipeline: raw-value normalization, precedence
//! merging, default filling and unknown-field policy.
//!
//! Precedence: CLI values > file values > schema defaults. Objects
//! deep-merge; arrays replace as atomic values.

use serde_json::{Map, Value};

use iolink_core::{fill_defaults, validate_field, FieldType, ValidationError};

use crate::schema::ServiceConfigSchema;

/// What to do with keys the schema does not declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownFieldPolicy {
    /// Project layer: reject so typos surface.
    Reject,
    /// Deep user-controlled config: pass through.
    Allow,
}

/// Deep-merge `override_with` onto `base`. Nested objects merge key-wise;
/// everything else (arrays included) replaces wholesale.
pub fn deep_merge(base: &Map<String, Value>, override_with: &Map<String, Value>) -> Map<String, Value> {
    let mut result = base.clone();
    for (key, value) in override_with {
        match (result.get(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                result.insert(key.clone(), Value::Object(deep_merge(existing, incoming)));
            }
            _ => {
                result.insert(key.clone(), value.clone());
            }
        }
    }
    result
}

/// Normalize raw string values (e.g. CLI `--set key=value` input) into the
/// types the schema declares. Failed conversions keep the raw string so
/// validation reports them. Unknown keys pass through untouched.
fn convert_raw_values(schema: &ServiceConfigSchema, raw: &Map<String, Value>) -> Map<String, Value> {
    let mut result = Map::new();
    for (key, value) in raw {
        let Some(field) = schema.find_field(key) else {
            result.insert(key.clone(), value.clone());
            continue;
        };

        match value {
            Value::String(s) => {
                let converted = convert_single_raw_value(s, field.field_type);
                result.insert(key.clone(), converted.unwrap_or_else(|| value.clone()));
            }
            Value::Object(inner) if field.field_type == FieldType::Object => {
                if field.fields.is_empty() {
                    result.insert(key.clone(), value.clone());
                } else {
                    let nested = ServiceConfigSchema { fields: field.fields.clone() };
                    result.insert(key.clone(), Value::Object(convert_raw_values(&nested, inner)));
                }
            }
            _ => {
                result.insert(key.clone(), value.clone());
            }
        }
    }
    result
}

fn convert_single_raw_value(raw: &str, field_type: FieldType) -> Option<Value> {
    match field_type {
        FieldType::Bool => match raw {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        FieldType::Int | FieldType::Int64 => raw.parse::<i64>().ok().map(Value::from),
        FieldType::Double => raw.parse::<f64>().ok().map(Value::from),
        FieldType::String | FieldType::Enum => Some(Value::String(raw.to_string())),
        FieldType::Array | FieldType::Object => match serde_json::from_str::<Value>(raw) {
            Ok(v @ (Value::Array(_) | Value::Object(_))) => Some(v),
            _ => None,
        },
        FieldType::Any => {
            // Any accepts every JSON literal; plain text stays a string.
            Some(serde_json::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string())))
        }
    }
}

/// Run the whole pipeline: normalize CLI values, merge with precedence,
/// fill defaults, apply the unknown-field policy, validate. Returns the
/// merged config on success.
pub fn merge_and_validate(
    schema: &ServiceConfigSchema,
    file_config: &Map<String, Value>,
    raw_cli_config: &Map<String, Value>,
    policy: UnknownFieldPolicy,
) -> Result<Map<String, Value>, ValidationError> {
    let typed_cli = convert_raw_values(schema, raw_cli_config);
    let merged = deep_merge(file_config, &typed_cli);
    let merged = fill_defaults(&merged, &schema.fields);

    if policy == UnknownFieldPolicy::Reject {
        reject_unknown_fields(schema, &merged, "")?;
    }

    validate(schema, &merged)?;
    Ok(merged)
}

fn validate(schema: &ServiceConfigSchema, config: &Map<String, Value>) -> Result<(), ValidationError> {
    for field in &schema.fields {
        if !field.required {
            continue;
        }
        match config.get(&field.name) {
            None => {
                return Err(ValidationError::new(
                    &field.name,
                    format!("required field '{}' is missing", field.name),
                ))
            }
            Some(Value::String(s)) if s.is_empty() => {
                return Err(ValidationError::new(
                    &field.name,
                    format!("required field '{}' cannot be empty", field.name),
                ))
            }
            Some(_) => {}
        }
    }

    for field in &schema.fields {
        if let Some(value) = config.get(&field.name) {
            validate_field(value, field)?;
        }
    }

    Ok(())
}

fn reject_unknown_fields(
    schema: &ServiceConfigSchema,
    config: &Map<String, Value>,
    prefix: &str,
) -> Result<(), ValidationError> {
    for (key, value) in config {
        let full_path =
            if prefix.is_empty() { key.clone() } else { format!("{prefix}.{key}") };
        let Some(field) = schema.find_field(key) else {
            return Err(ValidationError::new(full_path, "unknown configuration field"));
        };

        if field.field_type == FieldType::Object && !field.fields.is_empty() {
            if let Value::Object(inner) = value {
                let nested = ServiceConfigSchema { fields: field.fields.clone() };
                reject_unknown_fields(&nested, inner, &full_path)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "merge_tests.rs"]
mod tests;
