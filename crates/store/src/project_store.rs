// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Project persistence: one `<id>.json` per project, atomic writes.

use std::path::Path;

use indexmap::IndexMap;
use serde_json::{Map, Value};
use thiserror::Error;

use iolink_core::Project;

use crate::merge::{merge_and_validate, UnknownFieldPolicy};
use crate::service::ServiceInfo;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid project id: {0}")]
    InvalidId(String),

    #[error("project not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectLoadStats {
    pub loaded: usize,
    pub invalid: usize,
}

/// Load one project file. Always returns a record: parse failures come
/// back as retained-but-invalid projects so operators can inspect them.
pub fn load_project_file(file_path: &Path, id: &str) -> Project {
    let mut project = Project { id: id.to_string(), ..Project::default() };

    let bytes = match std::fs::read(file_path) {
        Ok(bytes) => bytes,
        Err(_) => {
            project.invalidate(format!("cannot open file: {}", file_path.display()));
            return project;
        }
    };

    let value: Value = match serde_json::from_slice(&bytes) {
        Ok(value) => value,
        Err(e) => {
            project.invalidate(format!("JSON parse error: {e}"));
            return project;
        }
    };

    match Project::from_json(id, &value) {
        Ok(parsed) => parsed,
        Err(e) => {
            project.invalidate(e.0);
            project
        }
    }
}

/// Load every `<id>.json` in the directory, validating each against the
/// referenced service. Files whose name is not a legal project id are
/// skipped entirely.
pub fn load_all_projects(
    projects_dir: &Path,
    services: &IndexMap<String, ServiceInfo>,
) -> (IndexMap<String, Project>, ProjectLoadStats) {
    let mut result = IndexMap::new();
    let mut stats = ProjectLoadStats::default();

    let Ok(entries) = std::fs::read_dir(projects_dir) else {
        return (result, stats);
    };
    let mut files: Vec<std::path::PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().and_then(|e| e.to_str()) == Some("json"))
        .collect();
    files.sort();

    for file in files {
        let Some(id) = file.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
            continue;
        };
        if !Project::is_valid_id(&id) {
            tracing::warn!(file = %file.display(), "skip invalid id filename");
            continue;
        }

        let mut project = load_project_file(&file, &id);
        if project.valid {
            validate_project(&mut project, services);
        }

        if project.valid {
            stats.loaded += 1;
        } else {
            stats.invalid += 1;
            tracing::warn!(id = %id, error = %project.error, "project invalid");
        }
        result.insert(id, project);
    }

    (result, stats)
}

/// Cross-check a project against its service schema, replacing the config
/// with the merged (default-filled) result on success.
pub fn validate_project(
    project: &mut Project,
    services: &IndexMap<String, ServiceInfo>,
) -> bool {
    let Some(service) = services.get(&project.service_id) else {
        project.invalidate(format!("service not found: {}", project.service_id));
        return false;
    };

    // The project config rides in the raw slot so string values are
    // normalized to the schema types before validation.
    match merge_and_validate(
        &service.schema,
        &Map::new(),
        &project.config,
        UnknownFieldPolicy::Reject,
    ) {
        Ok(merged) => {
            project.config = merged;
            project.valid = true;
            project.error.clear();
            true
        }
        Err(e) => {
            project.invalidate(e.to_string());
            false
        }
    }
}

/// Atomic save: write to a temp file in the same directory, fsync, rename.
pub fn save_project(projects_dir: &Path, project: &Project) -> Result<(), StoreError> {
    if !Project::is_valid_id(&project.id) {
        return Err(StoreError::InvalidId(project.id.clone()));
    }
    std::fs::create_dir_all(projects_dir)?;

    let body = serde_json::to_vec_pretty(&project.to_json())?;
    let mut tmp = tempfile::NamedTempFile::new_in(projects_dir)?;
    std::io::Write::write_all(&mut tmp, &body)?;
    tmp.as_file().sync_all()?;
    tmp.persist(projects_dir.join(format!("{}.json", project.id)))
        .map_err(|e| StoreError::Io(e.error))?;
    Ok(())
}

/// Delete the project file. A missing file is an error, not a no-op.
pub fn remove_project(projects_dir: &Path, id: &str) -> Result<(), StoreError> {
    let file_path = projects_dir.join(format!("{id}.json"));
    if !file_path.exists() {
        return Err(StoreError::NotFound(id.to_string()));
    }
    std::fs::remove_file(file_path)?;
    Ok(())
}

#[cfg(test)]
#[path = "project_store_tests.rs"]
mod tests;
