// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Router assembly: REST routes, SSE, the DriverLab bridge and CORS.

use std::sync::Arc;

use axum::http::HeaderValue;
use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::driverlab;
use crate::handlers;
use crate::manager::ServerManager;
use crate::sse;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<ServerManager>,
}

/// Build the `/api` router. CORS headers are attached to every response,
/// including preflights and misses.
pub fn build_app(manager: Arc<ServerManager>) -> Router {
    let cors = cors_layer(manager.config().cors_origin.as_deref());
    let state = AppState { manager };

    Router::new()
        .route("/api/server/status", get(handlers::server_status))
        .route("/api/services", get(handlers::list_services))
        .route("/api/services/scan", axum::routing::post(handlers::scan_services))
        .route("/api/services/:id", get(handlers::get_service))
        .route(
            "/api/projects",
            get(handlers::list_projects).post(handlers::create_project),
        )
        .route(
            "/api/projects/:id",
            get(handlers::get_project)
                .put(handlers::update_project)
                .delete(handlers::delete_project),
        )
        .route(
            "/api/projects/:id/validate",
            axum::routing::post(handlers::validate_project_config),
        )
        .route("/api/projects/:id/start", axum::routing::post(handlers::start_project))
        .route("/api/projects/:id/stop", axum::routing::post(handlers::stop_project))
        .route("/api/projects/:id/reload", axum::routing::post(handlers::reload_project))
        .route("/api/projects/:id/runtime", get(handlers::project_runtime))
        .route("/api/instances", get(handlers::list_instances))
        .route(
            "/api/instances/:id/terminate",
            axum::routing::post(handlers::terminate_instance),
        )
        .route("/api/instances/:id/logs", get(handlers::instance_logs))
        .route("/api/drivers", get(handlers::list_drivers))
        .route("/api/drivers/scan", axum::routing::post(handlers::scan_drivers))
        .route("/api/events", get(sse::events))
        .route("/api/driverlab/:driver_id", get(driverlab::driverlab_ws))
        .fallback(handlers::not_found)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origin: Option<&str>) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    match origin {
        None | Some("*") => layer.allow_origin(Any),
        Some(origin) => match origin.parse::<HeaderValue>() {
            Ok(value) => layer.allow_origin(value),
            Err(_) => layer.allow_origin(Any),
        },
    }
}

#[cfg(test)]
#[path = "app_tests.rs"]
mod tests;
