// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Service directory scanning.
//!
//! A service is a directory holding `manifest.json`, `config.schema.json`
//! and an `index.*` entry file. Duplicate ids keep the first discovery;
//! later ones count as failures.

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::manifest::ServiceManifest;
use crate::schema::ServiceConfigSchema;

/// A loaded service definition.
#[derive(Debug, Clone)]
pub struct ServiceInfo {
    pub id: String,
    pub name: String,
    pub version: String,
    pub service_dir: PathBuf,
    pub manifest: ServiceManifest,
    pub schema: ServiceConfigSchema,
    /// The schema file verbatim, for API exposure.
    pub raw_schema: Map<String, Value>,
}

impl ServiceInfo {
    /// Two services are interchangeable when nothing observable changed.
    pub fn same_shape(&self, other: &ServiceInfo) -> bool {
        self.name == other.name
            && self.version == other.version
            && self.service_dir == other.service_dir
            && self.raw_schema == other.raw_schema
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceScanStats {
    pub scanned_dirs: usize,
    pub loaded: usize,
    pub failed: usize,
}

#[derive(Debug, Default)]
pub struct ServiceScanner;

impl ServiceScanner {
    pub fn new() -> Self {
        ServiceScanner
    }

    pub fn scan(&self, services_dir: &Path) -> (IndexMap<String, ServiceInfo>, ServiceScanStats) {
        let mut result = IndexMap::new();
        let mut stats = ServiceScanStats::default();

        let Ok(entries) = std::fs::read_dir(services_dir) else {
            return (result, stats);
        };
        let mut dirs: Vec<PathBuf> =
            entries.flatten().map(|e| e.path()).filter(|p| p.is_dir()).collect();
        dirs.sort();

        for dir in dirs {
            stats.scanned_dirs += 1;
            match self.load_service(&dir) {
                Ok(info) => {
                    if result.contains_key(&info.id) {
                        stats.failed += 1;
                        tracing::warn!(
                            id = %info.id,
                            dir = %dir.display(),
                            "duplicate service id, keeping the first"
                        );
                        continue;
                    }
                    stats.loaded += 1;
                    result.insert(info.id.clone(), info);
                }
                Err(error) => {
                    stats.failed += 1;
                    tracing::warn!(dir = %dir.display(), error = %error, "service skipped");
                }
            }
        }

        (result, stats)
    }

    pub fn load_service(&self, service_dir: &Path) -> Result<ServiceInfo, String> {
        validate_layout(service_dir)?;

        let manifest = ServiceManifest::load_from_file(&service_dir.join("manifest.json"))?;

        let schema_path = service_dir.join("config.schema.json");
        let schema = ServiceConfigSchema::from_file(&schema_path)?;

        let raw_bytes = std::fs::read(&schema_path)
            .map_err(|_| format!("cannot open config schema file: {}", schema_path.display()))?;
        let raw_schema = serde_json::from_slice::<Value>(&raw_bytes)
            .ok()
            .and_then(|v| v.as_object().cloned())
            .ok_or_else(|| "config.schema.json must be a JSON object".to_string())?;

        Ok(ServiceInfo {
            id: manifest.id.clone(),
            name: manifest.name.clone(),
            version: manifest.version.clone(),
            service_dir: service_dir.to_path_buf(),
            manifest,
            schema,
            raw_schema,
        })
    }
}

/// Locate the service entry file (`index.js`, `index.py`, ...).
pub fn find_entry_file(service_dir: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(service_dir).ok()?;
    let mut candidates: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| {
            p.is_file() && p.file_stem().and_then(|s| s.to_str()) == Some("index")
        })
        .collect();
    candidates.sort();
    candidates.into_iter().next()
}

fn validate_layout(service_dir: &Path) -> Result<(), String> {
    if !service_dir.is_dir() {
        return Err(format!("service directory does not exist: {}", service_dir.display()));
    }
    if !service_dir.join("manifest.json").exists() {
        return Err(format!(
            "missing manifest.json in service directory: {}",
            service_dir.display()
        ));
    }
    if find_entry_file(service_dir).is_none() {
        return Err(format!(
            "missing index entry file in service directory: {}",
            service_dir.display()
        ));
    }
    if !service_dir.join("config.schema.json").exists() {
        return Err(format!(
            "missing config.schema.json in service directory: {}",
            service_dir.display()
        ));
    }
    Ok(())
}

#[cfg(test)]
#[path = "service_tests.rs"]
mod tests;
