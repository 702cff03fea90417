// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Server manager: owns the catalogs, the engine, the event bus and the
//! shutdown sequence.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use iolink_core::Project;
use iolink_engine::{
    EventBus, EventLog, InstanceEvent, InstanceManager, ScheduleEngine, ScheduleEvent,
};
use iolink_host::{DriverCatalog, DriverScanner, ScanStats};
use iolink_store::{ServiceInfo, ServiceScanStats, ServiceScanner};

use crate::config::ServerConfig;

/// Upper bound on concurrent SSE streams; the oldest is evicted past it.
const MAX_SSE_CONNECTIONS: usize = 32;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Outcome of a service rescan with project revalidation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceRescanStats {
    pub scan: ServiceScanStats,
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub unchanged: usize,
    pub revalidated: usize,
    pub became_valid: usize,
    pub became_invalid: usize,
}

pub struct ServerManager {
    data_root: PathBuf,
    config: ServerConfig,
    started_at: DateTime<Utc>,

    services: Mutex<IndexMap<String, ServiceInfo>>,
    projects: Mutex<IndexMap<String, Project>>,
    driver_catalog: DriverCatalog,
    driver_scanner: DriverScanner,
    service_scanner: ServiceScanner,

    instances: Arc<InstanceManager>,
    schedule: Arc<ScheduleEngine>,
    bus: EventBus,
    event_log: Mutex<Option<EventLog>>,

    /// Cancels SSE streams and WS bridges on shutdown.
    shutdown_token: CancellationToken,
    sse_connections: Mutex<VecDeque<CancellationToken>>,
}

impl ServerManager {
    /// Build the manager and wire engine events onto the bus. Must run on
    /// a tokio runtime.
    pub fn new(data_root: impl Into<PathBuf>, config: ServerConfig) -> Arc<ServerManager> {
        let data_root = data_root.into();
        let instances = InstanceManager::new(&data_root, config.service_program.clone());
        let schedule = ScheduleEngine::new(Arc::clone(&instances));
        let bus = EventBus::new();

        let event_log = EventLog::start(
            data_root.join("logs").join("events.log"),
            &bus,
            config.log_max_bytes,
            config.log_max_files,
        );

        let manager = Arc::new(ServerManager {
            data_root,
            config,
            started_at: Utc::now(),
            services: Mutex::new(IndexMap::new()),
            projects: Mutex::new(IndexMap::new()),
            driver_catalog: DriverCatalog::new(),
            driver_scanner: DriverScanner::new(),
            service_scanner: ServiceScanner::new(),
            instances,
            schedule,
            bus,
            event_log: Mutex::new(Some(event_log)),
            shutdown_token: CancellationToken::new(),
            sse_connections: Mutex::new(VecDeque::new()),
        });

        manager.spawn_event_forwarders();
        manager
    }

    /// Instance and schedule notifications become bus events, mirroring
    /// the types the API documents.
    fn spawn_event_forwarders(self: &Arc<Self>) {
        let bus = self.bus.clone();
        let mut instance_rx = self.instances.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = recv_skip_lag(&mut instance_rx).await {
                match event {
                    InstanceEvent::Started { instance_id, project_id, pid } => bus.publish(
                        "instance.started",
                        json!({"instanceId": instance_id, "projectId": project_id, "pid": pid}),
                    ),
                    InstanceEvent::Finished { instance_id, project_id, exit_code, crashed } => {
                        bus.publish(
                            "instance.finished",
                            json!({
                                "instanceId": instance_id,
                                "projectId": project_id,
                                "exitCode": exit_code,
                                "status": if crashed { "crashed" } else { "normal" },
                            }),
                        )
                    }
                }
            }
        });

        let bus = self.bus.clone();
        let mut schedule_rx = self.schedule.subscribe();
        tokio::spawn(async move {
            while let Ok(event) = recv_skip_lag(&mut schedule_rx).await {
                match event {
                    ScheduleEvent::Triggered { project_id, schedule_type } => bus.publish(
                        "schedule.triggered",
                        json!({"projectId": project_id, "scheduleType": schedule_type}),
                    ),
                    ScheduleEvent::Suppressed { project_id, reason, consecutive_failures } => bus
                        .publish(
                            "schedule.suppressed",
                            json!({
                                "projectId": project_id,
                                "reason": reason,
                                "consecutiveFailures": consecutive_failures,
                            }),
                        ),
                }
            }
        });
    }

    /// Initial scans: services, drivers (with meta refresh), projects.
    pub async fn initialize(&self) -> Result<(), String> {
        if !self.data_root.is_dir() {
            return Err(format!("data root does not exist: {}", self.data_root.display()));
        }

        let (services, svc_stats) = self.service_scanner.scan(&self.data_root.join("services"));
        tracing::info!(loaded = svc_stats.loaded, failed = svc_stats.failed, "services scanned");

        let drivers_dir = self.data_root.join("drivers");
        if drivers_dir.is_dir() {
            let (drivers, stats) = self.driver_scanner.scan(&drivers_dir, true).await;
            self.driver_catalog.replace_all(drivers);
            tracing::info!(
                updated = stats.updated,
                newly_failed = stats.newly_failed,
                skipped_failed = stats.skipped_failed,
                "drivers scanned"
            );
        } else {
            self.driver_catalog.clear();
        }

        let (projects, project_stats) =
            iolink_store::load_all_projects(&self.data_root.join("projects"), &services);
        tracing::info!(
            loaded = project_stats.loaded,
            invalid = project_stats.invalid,
            "projects loaded"
        );

        *self.services.lock() = services;
        *self.projects.lock() = projects;
        Ok(())
    }

    pub fn data_root(&self) -> &Path {
        &self.data_root
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn instances(&self) -> &Arc<InstanceManager> {
        &self.instances
    }

    pub fn schedule(&self) -> &Arc<ScheduleEngine> {
        &self.schedule
    }

    pub fn driver_catalog(&self) -> &DriverCatalog {
        &self.driver_catalog
    }

    pub fn services(&self) -> IndexMap<String, ServiceInfo> {
        self.services.lock().clone()
    }

    pub fn projects(&self) -> IndexMap<String, Project> {
        self.projects.lock().clone()
    }

    pub fn get_project(&self, id: &str) -> Option<Project> {
        self.projects.lock().get(id).cloned()
    }

    pub fn get_service(&self, id: &str) -> Option<ServiceInfo> {
        self.services.lock().get(id).cloned()
    }

    pub fn upsert_project(&self, project: Project) {
        self.projects.lock().insert(project.id.clone(), project);
    }

    pub fn remove_project_record(&self, id: &str) {
        self.projects.lock().shift_remove(id);
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Register an SSE stream, evicting the oldest one over the cap.
    pub fn register_sse(&self) -> CancellationToken {
        let token = self.shutdown_token.child_token();
        let mut connections = self.sse_connections.lock();
        connections.retain(|t| !t.is_cancelled());
        if connections.len() >= MAX_SSE_CONNECTIONS {
            if let Some(oldest) = connections.pop_front() {
                oldest.cancel();
            }
        }
        connections.push_back(token.clone());
        token
    }

    pub async fn start_scheduling(self: &Arc<Self>) {
        let projects = self.projects();
        let services = self.services();
        self.schedule.start_all(projects, &services).await;
    }

    pub async fn rescan_drivers(&self, refresh_meta: bool) -> ScanStats {
        let drivers_dir = self.data_root.join("drivers");
        if !drivers_dir.is_dir() {
            self.driver_catalog.clear();
            return ScanStats::default();
        }
        let (drivers, stats) = self.driver_scanner.scan(&drivers_dir, refresh_meta).await;
        self.driver_catalog.replace_all(drivers);
        stats
    }

    /// Rescan services, diff against the previous set and revalidate every
    /// project. Projects that became invalid are stopped.
    pub async fn rescan_services(self: &Arc<Self>) -> ServiceRescanStats {
        let mut stats = ServiceRescanStats::default();
        let old_services = self.services();

        let (new_services, scan_stats) =
            self.service_scanner.scan(&self.data_root.join("services"));
        stats.scan = scan_stats;

        for (id, current) in &new_services {
            match old_services.get(id) {
                None => stats.added += 1,
                Some(previous) if previous.same_shape(current) => stats.unchanged += 1,
                Some(_) => stats.updated += 1,
            }
        }
        stats.removed = old_services.keys().filter(|id| !new_services.contains_key(*id)).count();

        *self.services.lock() = new_services.clone();

        let mut became_invalid = Vec::new();
        {
            let mut projects = self.projects.lock();
            for (id, project) in projects.iter_mut() {
                let was_valid = project.valid;
                let now_valid = iolink_store::validate_project(project, &new_services);
                stats.revalidated += 1;
                match (was_valid, now_valid) {
                    (false, true) => stats.became_valid += 1,
                    (true, false) => {
                        stats.became_invalid += 1;
                        became_invalid.push(id.clone());
                    }
                    _ => {}
                }
            }
        }

        for id in became_invalid {
            self.schedule.stop_project(&id);
            self.instances.terminate_by_project(&id);
        }

        self.start_scheduling().await;
        stats
    }

    pub fn server_status(&self) -> serde_json::Value {
        let projects = self.projects.lock();
        let valid = projects.values().filter(|p| p.valid).count();
        let enabled = projects.values().filter(|p| p.enabled).count();
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "startedAt": self.started_at.to_rfc3339(),
            "uptimeMs": (Utc::now() - self.started_at).num_milliseconds(),
            "host": self.config.host,
            "port": self.config.port,
            "dataRoot": self.data_root.display().to_string(),
            "services": self.services.lock().len(),
            "projects": {
                "total": projects.len(),
                "valid": valid,
                "invalid": projects.len() - valid,
                "enabled": enabled,
                "disabled": projects.len() - enabled,
            },
            "instances": self.instances.count(None),
            "drivers": self.driver_catalog.len(),
        })
    }

    /// Ordered shutdown: WS bridges and SSE streams first, then the
    /// schedule gate and timers, then the instances with a bounded grace.
    pub async fn shutdown(&self) {
        self.shutdown_token.cancel();
        for token in self.sse_connections.lock().drain(..) {
            token.cancel();
        }
        self.schedule.set_shutting_down(true);
        self.schedule.stop_all();
        self.instances.terminate_all();
        self.instances.wait_all_finished(SHUTDOWN_GRACE).await;
        // The event log writer stops with the bus subscribers.
        self.event_log.lock().take();
    }
}

async fn recv_skip_lag<T: Clone>(
    rx: &mut tokio::sync::broadcast::Receiver<T>,
) -> Result<T, tokio::sync::broadcast::error::RecvError> {
    loop {
        match rx.recv().await {
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
            other => return other,
        }
    }
}
