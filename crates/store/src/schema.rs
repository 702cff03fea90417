// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Parser for `config.schema.json`: a root object whose entries are
//! recursive field descriptors.

use std::path::Path;

use serde_json::{Map, Value};

use iolink_core::{Constraints, FieldMeta, FieldType};

/// Parsed service configuration schema.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ServiceConfigSchema {
    pub fields: Vec<FieldMeta>,
}

impl ServiceConfigSchema {
    /// Parse the root schema object. Errors carry the dotted path of the
    /// offending descriptor.
    pub fn from_json(value: &Value) -> Result<ServiceConfigSchema, String> {
        let obj = value
            .as_object()
            .ok_or_else(|| "config.schema.json must be a JSON object".to_string())?;
        Ok(ServiceConfigSchema { fields: parse_fields(obj, "")? })
    }

    pub fn from_file(path: &Path) -> Result<ServiceConfigSchema, String> {
        let bytes = std::fs::read(path)
            .map_err(|_| format!("cannot open config schema file: {}", path.display()))?;
        let value: Value = serde_json::from_slice(&bytes)
            .map_err(|e| format!("config.schema.json parse error: {e}"))?;
        ServiceConfigSchema::from_json(&value)
    }

    pub fn find_field(&self, name: &str) -> Option<&FieldMeta> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Top-level defaults only; the merge pipeline handles nesting.
    pub fn generate_defaults(&self) -> Map<String, Value> {
        let mut config = Map::new();
        for field in &self.fields {
            if !field.default_value.is_null() {
                config.insert(field.name.clone(), field.default_value.clone());
            }
        }
        config
    }

    pub fn required_field_names(&self) -> Vec<String> {
        self.fields.iter().filter(|f| f.required).map(|f| f.name.clone()).collect()
    }
}

fn parse_fields(obj: &Map<String, Value>, path_prefix: &str) -> Result<Vec<FieldMeta>, String> {
    let mut fields = Vec::with_capacity(obj.len());
    for (field_name, descriptor) in obj {
        let field_path = if path_prefix.is_empty() {
            field_name.clone()
        } else {
            format!("{path_prefix}.{field_name}")
        };
        let desc = descriptor.as_object().ok_or_else(|| {
            format!("field descriptor for \"{field_path}\" must be a JSON object")
        })?;

        let type_str = desc.get("type").and_then(Value::as_str).unwrap_or("any");
        let field_type = FieldType::parse(type_str).ok_or_else(|| {
            format!("unknown field type \"{type_str}\" for field \"{field_path}\"")
        })?;

        let mut field = FieldMeta::named(field_name.clone(), field_type);
        field.required = desc.get("required").and_then(Value::as_bool).unwrap_or(false);
        field.description =
            desc.get("description").and_then(Value::as_str).unwrap_or_default().to_string();
        if let Some(default) = desc.get("default") {
            field.default_value = default.clone();
        }
        if let Some(constraints) = desc.get("constraints") {
            field.constraints = parse_constraints(constraints, &field_path)?;
        }

        if let Some(items) = desc.get("items") {
            let item_obj = items.as_object().ok_or_else(|| {
                format!("\"items\" for field \"{field_path}\" must be a JSON object")
            })?;
            let item_type_str = item_obj.get("type").and_then(Value::as_str).unwrap_or("any");
            let item_type = FieldType::parse(item_type_str).ok_or_else(|| {
                format!("unknown item type \"{item_type_str}\" for field \"{field_path}\"")
            })?;
            let mut item_meta = FieldMeta::named("", item_type);
            if let Some(constraints) = item_obj.get("constraints") {
                item_meta.constraints = parse_constraints(constraints, &field_path)?;
            }
            field.items = Some(Box::new(item_meta));
        }

        if let Some(nested) = desc.get("fields") {
            let nested_obj = nested.as_object().ok_or_else(|| {
                format!("\"fields\" for field \"{field_path}\" must be a JSON object")
            })?;
            field.fields = parse_fields(nested_obj, &field_path)?;
        }

        fields.push(field);
    }
    Ok(fields)
}

fn parse_constraints(value: &Value, field_path: &str) -> Result<Constraints, String> {
    serde_json::from_value(value.clone())
        .map_err(|e| format!("invalid constraints for field \"{field_path}\": {e}"))
}

#[cfg(test)]
#[path = "schema_tests.rs"]
mod tests;
