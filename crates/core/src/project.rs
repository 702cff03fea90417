// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persisted project records: a service reference, a schedule and a config.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::schedule::Schedule;

const KNOWN_FIELDS: [&str; 6] = ["id", "name", "serviceId", "enabled", "schedule", "config"];

/// A project binds a service to a schedule and a configuration. Invalid
/// projects are retained (`valid == false`) but never scheduled.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub service_id: String,
    pub enabled: bool,
    pub schedule: Schedule,
    pub config: Map<String, Value>,

    pub valid: bool,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ProjectParseError(pub String);

impl Project {
    /// Project ids are restricted to `[A-Za-z0-9_-]+` so they can double as
    /// file and directory names.
    pub fn is_valid_id(id: &str) -> bool {
        !id.is_empty()
            && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    }

    /// Parse a project body. `id` comes from the filename/route; a body
    /// `id`, when present, must agree. Unknown fields reject the record.
    pub fn from_json(id: &str, value: &Value) -> Result<Project, ProjectParseError> {
        let obj = value
            .as_object()
            .ok_or_else(|| ProjectParseError("project file must contain a JSON object".into()))?;

        for key in obj.keys() {
            if !KNOWN_FIELDS.contains(&key.as_str()) {
                return Err(ProjectParseError(format!("unknown field in project config: {key}")));
            }
        }

        if let Some(body_id) = obj.get("id") {
            let body_id = body_id
                .as_str()
                .ok_or_else(|| ProjectParseError("project field 'id' must be a string".into()))?;
            if !body_id.is_empty() && body_id != id {
                return Err(ProjectParseError(format!(
                    "project id mismatch: body={body_id}, path={id}"
                )));
            }
        }

        let name = obj
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| ProjectParseError("missing required string field: name".into()))?;
        if name.is_empty() {
            return Err(ProjectParseError("project name cannot be empty".into()));
        }

        let service_id = obj
            .get("serviceId")
            .and_then(Value::as_str)
            .ok_or_else(|| ProjectParseError("missing required string field: serviceId".into()))?;
        if service_id.is_empty() {
            return Err(ProjectParseError("project serviceId cannot be empty".into()));
        }

        let enabled = match obj.get("enabled") {
            None => true,
            Some(Value::Bool(b)) => *b,
            Some(_) => {
                return Err(ProjectParseError("project field 'enabled' must be a bool".into()))
            }
        };

        let schedule = match obj.get("schedule") {
            None => Schedule::Manual,
            Some(v) if v.is_object() => {
                Schedule::from_json(v).map_err(|e| ProjectParseError(e.0))?
            }
            Some(_) => {
                return Err(ProjectParseError("project field 'schedule' must be an object".into()))
            }
        };

        let config = match obj.get("config") {
            None => Map::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(_) => {
                return Err(ProjectParseError("project field 'config' must be an object".into()))
            }
        };

        Ok(Project {
            id: id.to_string(),
            name: name.to_string(),
            service_id: service_id.to_string(),
            enabled,
            schedule,
            config,
            valid: true,
            error: String::new(),
        })
    }

    /// Serialize the persisted body. `id` lives in the filename; `valid`
    /// and `error` are derived state and never persisted.
    pub fn to_json(&self) -> Value {
        let mut obj = Map::new();
        obj.insert("name".to_string(), Value::String(self.name.clone()));
        obj.insert("serviceId".to_string(), Value::String(self.service_id.clone()));
        obj.insert("enabled".to_string(), Value::Bool(self.enabled));
        obj.insert("schedule".to_string(), self.schedule.to_json());
        obj.insert("config".to_string(), Value::Object(self.config.clone()));
        Value::Object(obj)
    }

    /// Mark the record invalid, keeping it for operator inspection.
    pub fn invalidate(&mut self, error: impl Into<String>) {
        self.valid = false;
        self.error = error.into();
    }
}

#[cfg(test)]
#[path = "project_tests.rs"]
mod tests;
