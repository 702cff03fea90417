// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Service manifest: fixed keys, strict parsing.

use std::path::Path;

use serde_json::Value;

const KNOWN_FIELDS: [&str; 6] =
    ["manifestVersion", "id", "name", "version", "description", "author"];

/// Parsed `manifest.json`. Unknown keys reject the file so typos never
/// pass silently.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServiceManifest {
    pub manifest_version: String,
    pub id: String,
    pub name: String,
    pub version: String,
    pub description: String,
    pub author: String,
}

impl ServiceManifest {
    pub fn from_json(value: &Value) -> Result<ServiceManifest, String> {
        let obj = value
            .as_object()
            .ok_or_else(|| "manifest.json must contain a JSON object".to_string())?;

        for key in obj.keys() {
            if !KNOWN_FIELDS.contains(&key.as_str()) {
                return Err(format!("unknown field in manifest.json: \"{key}\""));
            }
        }

        let manifest_version = obj
            .get("manifestVersion")
            .and_then(Value::as_str)
            .ok_or_else(|| "missing required field: manifestVersion".to_string())?;
        if manifest_version != "1" {
            return Err(format!(
                "unsupported manifestVersion: \"{manifest_version}\" (expected \"1\")"
            ));
        }

        let required = |key: &str| -> Result<String, String> {
            match obj.get(key).and_then(Value::as_str) {
                Some(s) if !s.is_empty() => Ok(s.to_string()),
                _ => Err(format!("missing required field: {key}")),
            }
        };

        Ok(ServiceManifest {
            manifest_version: manifest_version.to_string(),
            id: required("id")?,
            name: required("name")?,
            version: required("version")?,
            description: obj
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            author: obj.get("author").and_then(Value::as_str).unwrap_or_default().to_string(),
        })
    }

    pub fn load_from_file(path: &Path) -> Result<ServiceManifest, String> {
        let bytes = std::fs::read(path)
            .map_err(|_| format!("cannot open manifest file: {}", path.display()))?;
        let value: Value = serde_json::from_slice(&bytes)
            .map_err(|e| format!("manifest.json parse error: {e}"))?;
        ServiceManifest::from_json(&value)
    }

    pub fn to_json(&self) -> Value {
        let mut obj = serde_json::Map::new();
        obj.insert("manifestVersion".into(), Value::String(self.manifest_version.clone()));
        obj.insert("id".into(), Value::String(self.id.clone()));
        obj.insert("name".into(), Value::String(self.name.clone()));
        obj.insert("version".into(), Value::String(self.version.clone()));
        if !self.description.is_empty() {
            obj.insert("description".into(), Value::String(self.description.clone()));
        }
        if !self.author.is_empty() {
            obj.insert("author".into(), Value::String(self.author.clone()));
        }
        Value::Object(obj)
    }
}

#[cfg(test)]
#[path = "manifest_tests.rs"]
mod tests;
