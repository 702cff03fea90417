// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! REST handlers for services, projects, instances and drivers.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use iolink_core::{Project, Schedule};
use iolink_engine::InstanceSnapshot;
use iolink_store::{self as store};

use crate::app::AppState;
use crate::error::ApiError;
use crate::manager::ServerManager;

fn parse_json_object_body(body: &Bytes) -> Result<Map<String, Value>, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }
    serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|v| v.as_object().cloned())
        .ok_or_else(|| ApiError::bad_request("request body must be a JSON object"))
}

fn instance_to_json(inst: &InstanceSnapshot) -> Value {
    json!({
        "id": inst.id,
        "projectId": inst.project_id,
        "serviceId": inst.service_id,
        "pid": inst.pid,
        "startedAt": inst.started_at.to_rfc3339(),
        "status": inst.status.to_string(),
    })
}

fn project_to_json(manager: &ServerManager, project: &Project) -> Value {
    let running = manager.instances().count(Some(&project.id));
    let status = if !project.valid {
        "invalid"
    } else if running > 0 {
        "running"
    } else {
        "stopped"
    };

    let mut out = json!({
        "id": project.id,
        "name": project.name,
        "serviceId": project.service_id,
        "enabled": project.enabled,
        "valid": project.valid,
        "schedule": project.schedule.to_json(),
        "config": Value::Object(project.config.clone()),
        "instanceCount": running,
        "status": status,
    });
    if !project.error.is_empty() {
        out["error"] = Value::String(project.error.clone());
    }
    out
}

pub async fn not_found() -> ApiError {
    ApiError::not_found("not found")
}

// ── Server ──────────────────────────────────────────────────────────

pub async fn server_status(State(state): State<AppState>) -> Json<Value> {
    Json(state.manager.server_status())
}

// ── Services ────────────────────────────────────────────────────────

pub async fn list_services(State(state): State<AppState>) -> Json<Value> {
    let projects = state.manager.projects();
    let services: Vec<Value> = state
        .manager
        .services()
        .values()
        .map(|service| {
            let project_count =
                projects.values().filter(|p| p.service_id == service.id).count();
            json!({
                "id": service.id,
                "name": service.name,
                "version": service.version,
                "serviceDir": service.service_dir.display().to_string(),
                "projectCount": project_count,
            })
        })
        .collect();
    Json(json!({ "services": services }))
}

pub async fn get_service(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let service =
        state.manager.get_service(&id).ok_or_else(|| ApiError::not_found("service not found"))?;
    let project_ids: Vec<String> = state
        .manager
        .projects()
        .values()
        .filter(|p| p.service_id == id)
        .map(|p| p.id.clone())
        .collect();

    Ok(Json(json!({
        "id": service.id,
        "name": service.name,
        "version": service.version,
        "serviceDir": service.service_dir.display().to_string(),
        "manifest": service.manifest.to_json(),
        "configSchema": Value::Object(service.raw_schema.clone()),
        "projects": project_ids,
    })))
}

pub async fn scan_services(State(state): State<AppState>) -> Json<Value> {
    let stats = state.manager.rescan_services().await;
    Json(json!({
        "scannedDirs": stats.scan.scanned_dirs,
        "loaded": stats.scan.loaded,
        "failed": stats.scan.failed,
        "added": stats.added,
        "updated": stats.updated,
        "removed": stats.removed,
        "unchanged": stats.unchanged,
        "revalidatedProjects": stats.revalidated,
        "becameValid": stats.became_valid,
        "becameInvalid": stats.became_invalid,
    }))
}

// ── Projects ────────────────────────────────────────────────────────

pub async fn list_projects(State(state): State<AppState>) -> Json<Value> {
    let projects: Vec<Value> = state
        .manager
        .projects()
        .values()
        .map(|p| project_to_json(&state.manager, p))
        .collect();
    Json(json!({ "projects": projects }))
}

pub async fn get_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let project =
        state.manager.get_project(&id).ok_or_else(|| ApiError::not_found("project not found"))?;
    let mut detail = project_to_json(&state.manager, &project);

    let instances: Vec<Value> =
        state.manager.instances().list(Some(&id)).iter().map(instance_to_json).collect();
    detail["instances"] = Value::Array(instances);

    if let Some(service) = state.manager.get_service(&project.service_id) {
        detail["configSchema"] = Value::Object(service.raw_schema.clone());
    }
    Ok(Json(detail))
}

pub async fn create_project(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let body = parse_json_object_body(&body)?;
    let id = body
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::bad_request("missing required string field: id"))?
        .to_string();
    if !Project::is_valid_id(&id) {
        return Err(ApiError::bad_request("invalid project id"));
    }
    if state.manager.get_project(&id).is_some() {
        return Err(ApiError::conflict("project already exists"));
    }

    let mut project = Project::from_json(&id, &Value::Object(body))
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    if !store::validate_project(&mut project, &state.manager.services()) {
        return Err(ApiError::bad_request(format!("project invalid: {}", project.error)));
    }
    store::save_project(&state.manager.data_root().join("projects"), &project)?;

    state.manager.upsert_project(project.clone());
    state.manager.start_scheduling().await;
    Ok((StatusCode::CREATED, Json(project_to_json(&state.manager, &project))))
}

pub async fn update_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    if state.manager.get_project(&id).is_none() {
        return Err(ApiError::not_found("project not found"));
    }
    let body = parse_json_object_body(&body)?;
    if let Some(body_id) = body.get("id").and_then(Value::as_str) {
        if body_id != id {
            return Err(ApiError::conflict("project id mismatch"));
        }
    }

    let mut project = Project::from_json(&id, &Value::Object(body))
        .map_err(|e| ApiError::bad_request(e.to_string()))?;
    if !store::validate_project(&mut project, &state.manager.services()) {
        return Err(ApiError::bad_request(format!("project invalid: {}", project.error)));
    }
    store::save_project(&state.manager.data_root().join("projects"), &project)?;

    state.manager.schedule().stop_project(&id);
    state.manager.instances().terminate_by_project(&id);
    state.manager.upsert_project(project.clone());
    state.manager.start_scheduling().await;
    Ok(Json(project_to_json(&state.manager, &project)))
}

pub async fn delete_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.manager.get_project(&id).is_none() {
        return Err(ApiError::not_found("project not found"));
    }
    store::remove_project(&state.manager.data_root().join("projects"), &id)
        .map_err(|e| ApiError::internal(e.to_string()))?;

    state.manager.schedule().stop_project(&id);
    state.manager.instances().terminate_by_project(&id);
    state.manager.remove_project_record(&id);
    Ok(StatusCode::NO_CONTENT)
}

pub async fn validate_project_config(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let project =
        state.manager.get_project(&id).ok_or_else(|| ApiError::not_found("project not found"))?;
    let body = parse_json_object_body(&body)?;
    let config = body
        .get("config")
        .and_then(Value::as_object)
        .ok_or_else(|| ApiError::bad_request("field 'config' must be an object"))?;

    let mut candidate = project;
    candidate.config = config.clone();
    candidate.valid = true;
    candidate.error.clear();
    let valid = store::validate_project(&mut candidate, &state.manager.services());

    let mut result = json!({ "valid": valid });
    if !valid {
        result["error"] = Value::String(candidate.error);
    }
    Ok(Json(result))
}

pub async fn start_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let project =
        state.manager.get_project(&id).ok_or_else(|| ApiError::not_found("project not found"))?;
    if !project.valid {
        return Err(ApiError::bad_request(format!("project invalid: {}", project.error)));
    }
    let service = state
        .manager
        .get_service(&project.service_id)
        .ok_or_else(|| ApiError::bad_request("service not found"))?;

    let running = state.manager.instances().count(Some(&id));
    match project.schedule {
        Schedule::Manual => {
            if running > 0 {
                return Err(ApiError::conflict("already running"));
            }
        }
        Schedule::FixedRate { max_concurrent, .. } => {
            if running >= max_concurrent as usize {
                return Err(ApiError::conflict("max concurrent reached"));
            }
        }
        Schedule::Daemon { .. } => {
            if running > 0 {
                return Ok(Json(json!({ "noop": true })));
            }
        }
    }

    state.manager.schedule().resume_project(&id);
    let instance_id =
        state.manager.instances().start_instance(&project, &service.service_dir).await?;
    let pid = state.manager.instances().get(&instance_id).map(|i| i.pid).unwrap_or(0);
    Ok(Json(json!({ "instanceId": instance_id, "pid": pid })))
}

pub async fn stop_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if state.manager.get_project(&id).is_none() {
        return Err(ApiError::not_found("project not found"));
    }
    state.manager.schedule().stop_project(&id);
    state.manager.instances().terminate_by_project(&id);
    Ok(Json(json!({ "stopped": true })))
}

pub async fn reload_project(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let file_path = state.manager.data_root().join("projects").join(format!("{id}.json"));
    if !file_path.exists() {
        return Err(ApiError::not_found("project file not found"));
    }

    let mut project = store::load_project_file(&file_path, &id);
    if !project.valid {
        return Err(ApiError::bad_request(project.error));
    }
    if !store::validate_project(&mut project, &state.manager.services()) {
        return Err(ApiError::bad_request(format!("project invalid: {}", project.error)));
    }

    state.manager.schedule().stop_project(&id);
    state.manager.instances().terminate_by_project(&id);
    state.manager.upsert_project(project.clone());
    state.manager.start_scheduling().await;
    Ok(Json(project_to_json(&state.manager, &project)))
}

pub async fn project_runtime(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if state.manager.get_project(&id).is_none() {
        return Err(ApiError::not_found("project not found"));
    }
    let runtime = state.manager.schedule().project_runtime_state(&id);
    let instances: Vec<Value> =
        state.manager.instances().list(Some(&id)).iter().map(instance_to_json).collect();

    Ok(Json(json!({
        "projectId": id,
        "shuttingDown": runtime.shutting_down,
        "restartSuppressed": runtime.restart_suppressed,
        "timerActive": runtime.timer_active,
        "consecutiveFailures": runtime.consecutive_failures,
        "instances": instances,
    })))
}

// ── Instances ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct InstanceListQuery {
    #[serde(rename = "projectId")]
    pub project_id: Option<String>,
}

pub async fn list_instances(
    State(state): State<AppState>,
    Query(query): Query<InstanceListQuery>,
) -> Json<Value> {
    let instances: Vec<Value> = state
        .manager
        .instances()
        .list(query.project_id.as_deref())
        .iter()
        .map(instance_to_json)
        .collect();
    Json(json!({ "instances": instances }))
}

pub async fn terminate_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if state.manager.instances().get(&id).is_none() {
        return Err(ApiError::not_found("instance not found"));
    }
    state.manager.instances().terminate_instance(&id);
    Ok(Json(json!({ "terminated": true })))
}

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub lines: Option<i64>,
}

pub async fn instance_logs(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<Value>, ApiError> {
    let lines = query.lines.unwrap_or(100);
    if !(1..=5000).contains(&lines) {
        return Err(ApiError::bad_request("lines out of range"));
    }

    // The id may be an instance id or, as a convenience, a project id.
    let project_id = match state.manager.instances().get(&id) {
        Some(instance) => instance.project_id,
        None if state.manager.get_project(&id).is_some() => id.clone(),
        None => return Err(ApiError::not_found("instance not found")),
    };

    let log_path = state.manager.data_root().join("logs").join(format!("{project_id}.log"));
    if !log_path.exists() {
        return Err(ApiError::not_found("log file not found"));
    }

    let content = std::fs::read_to_string(&log_path)
        .map_err(|e| ApiError::internal(format!("cannot read log file: {e}")))?;
    let all: Vec<&str> = content.lines().filter(|l| !l.is_empty()).collect();
    let start = all.len().saturating_sub(lines as usize);
    let tail: Vec<Value> = all[start..].iter().map(|l| Value::String((*l).to_string())).collect();

    Ok(Json(json!({ "projectId": project_id, "lines": tail })))
}

// ── Drivers ─────────────────────────────────────────────────────────

pub async fn list_drivers(State(state): State<AppState>) -> Json<Value> {
    let catalog = state.manager.driver_catalog();
    let drivers: Vec<Value> = catalog
        .list()
        .into_iter()
        .filter_map(|id| catalog.get(&id))
        .map(|config| {
            json!({
                "id": config.id,
                "program": config.program.display().to_string(),
                "metaHash": config.meta_hash,
                "name": config.meta.info.name,
                "version": config.meta.info.version,
                "healthy": catalog.health_check(&config.id),
            })
        })
        .collect();
    Json(json!({ "drivers": drivers }))
}

pub async fn scan_drivers(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let body = parse_json_object_body(&body)?;
    let refresh_meta = match body.get("refreshMeta") {
        None => true,
        Some(Value::Bool(b)) => *b,
        Some(_) => return Err(ApiError::bad_request("field 'refreshMeta' must be a bool")),
    };

    let stats = state.manager.rescan_drivers(refresh_meta).await;
    Ok(Json(json!({
        "scanned": stats.scanned,
        "updated": stats.updated,
        "newlyFailed": stats.newly_failed,
        "skippedFailed": stats.skipped_failed,
    })))
}
