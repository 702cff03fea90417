// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Schedule engine: drives projects to steady state.
//!
//! Manual projects never auto-start. Fixed-rate projects tick on a timer;
//! a skipped tick is never queued. Daemon projects are restarted after a
//! delay and suppressed once they crash-loop. The engine consumes
//! instance-finished notifications by subscription, not polling.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use iolink_core::{Project, Schedule};
use iolink_store::ServiceInfo;

use crate::instance::{InstanceEvent, InstanceManager};

const EVENT_CAPACITY: usize = 64;

/// Scheduling notifications for the event bus.
#[derive(Debug, Clone)]
pub enum ScheduleEvent {
    Triggered { project_id: String, schedule_type: &'static str },
    Suppressed { project_id: String, reason: String, consecutive_failures: u32 },
}

/// Runtime view of one project's scheduling state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectRuntimeState {
    pub shutting_down: bool,
    pub restart_suppressed: bool,
    pub timer_active: bool,
    pub consecutive_failures: u32,
}

#[derive(Default)]
struct EngineState {
    projects: IndexMap<String, Project>,
    service_dirs: HashMap<String, PathBuf>,
    timers: HashMap<String, CancellationToken>,
    consecutive_failures: HashMap<String, u32>,
    suppressed: HashSet<String>,
}

pub struct ScheduleEngine {
    instances: Arc<InstanceManager>,
    state: Mutex<EngineState>,
    shutting_down: AtomicBool,
    events: broadcast::Sender<ScheduleEvent>,
    listener: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ScheduleEngine {
    /// Create the engine and subscribe it to instance lifecycle events.
    pub fn new(instances: Arc<InstanceManager>) -> Arc<ScheduleEngine> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let engine = Arc::new(ScheduleEngine {
            instances: Arc::clone(&instances),
            state: Mutex::new(EngineState::default()),
            shutting_down: AtomicBool::new(false),
            events,
            listener: Mutex::new(None),
        });

        let mut rx = instances.subscribe();
        let weak = Arc::downgrade(&engine);
        let listener = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(InstanceEvent::Finished { project_id, exit_code, crashed, .. }) => {
                        let Some(engine) = weak.upgrade() else { break };
                        engine.on_instance_finished(&project_id, exit_code, crashed).await;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "schedule engine lagged behind instance events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        *engine.listener.lock() = Some(listener);
        engine
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScheduleEvent> {
        self.events.subscribe()
    }

    /// Bring the whole project set to steady state. Idempotent: any
    /// previous timers are stopped first.
    pub async fn start_all(
        self: &Arc<Self>,
        projects: IndexMap<String, Project>,
        services: &IndexMap<String, ServiceInfo>,
    ) {
        self.stop_all();

        let daemon_ids: Vec<String> = {
            let mut state = self.state.lock();
            state.projects = projects;
            state.service_dirs =
                services.iter().map(|(id, s)| (id.clone(), s.service_dir.clone())).collect();

            let mut daemons = Vec::new();
            let mut fixed_rates = Vec::new();
            for (id, project) in &state.projects {
                if !project.enabled || !project.valid {
                    continue;
                }
                if !state.service_dirs.contains_key(&project.service_id) {
                    continue;
                }
                match &project.schedule {
                    Schedule::Manual => {}
                    Schedule::FixedRate { interval_ms, .. } => {
                        fixed_rates.push((id.clone(), *interval_ms));
                    }
                    Schedule::Daemon { .. } => daemons.push(id.clone()),
                }
            }
            for (id, interval_ms) in fixed_rates {
                let token = CancellationToken::new();
                state.timers.insert(id.clone(), token.clone());
                tokio::spawn(run_fixed_rate(
                    Arc::downgrade(self),
                    id.clone(),
                    Duration::from_millis(interval_ms),
                    token,
                ));
            }
            daemons
        };

        for id in daemon_ids {
            self.start_daemon(&id).await;
        }
    }

    /// Stop every timer and clear failure bookkeeping.
    pub fn stop_all(&self) {
        let mut state = self.state.lock();
        for (_, token) in state.timers.drain() {
            token.cancel();
        }
        state.consecutive_failures.clear();
        state.suppressed.clear();
    }

    /// Stop the project's timer, suppress restarts, clear its counters.
    pub fn stop_project(&self, project_id: &str) {
        let mut state = self.state.lock();
        if let Some(token) = state.timers.remove(project_id) {
            token.cancel();
        }
        if let Some(token) = state.timers.remove(&format!("{project_id}#restart")) {
            token.cancel();
        }
        state.suppressed.insert(project_id.to_string());
        state.consecutive_failures.remove(project_id);
    }

    /// Clear suppression and failure counters.
    pub fn resume_project(&self, project_id: &str) {
        let mut state = self.state.lock();
        state.suppressed.remove(project_id);
        state.consecutive_failures.remove(project_id);
    }

    pub fn set_shutting_down(&self, value: bool) {
        self.shutting_down.store(value, Ordering::SeqCst);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    pub fn project_runtime_state(&self, project_id: &str) -> ProjectRuntimeState {
        let state = self.state.lock();
        ProjectRuntimeState {
            shutting_down: self.is_shutting_down(),
            restart_suppressed: state.suppressed.contains(project_id),
            timer_active: state.timers.contains_key(project_id),
            consecutive_failures: state.consecutive_failures.get(project_id).copied().unwrap_or(0),
        }
    }

    fn lookup(&self, project_id: &str) -> Option<(Project, PathBuf)> {
        let state = self.state.lock();
        let project = state.projects.get(project_id)?.clone();
        let dir = state.service_dirs.get(&project.service_id)?.clone();
        Some((project, dir))
    }

    fn is_suppressed(&self, project_id: &str) -> bool {
        self.state.lock().suppressed.contains(project_id)
    }

    async fn start_daemon(self: &Arc<Self>, project_id: &str) {
        if self.is_shutting_down() || self.is_suppressed(project_id) {
            return;
        }
        let Some((project, service_dir)) = self.lookup(project_id) else { return };
        if !project.enabled || !project.valid {
            return;
        }
        if self.instances.count(Some(project_id)) > 0 {
            return;
        }

        let _ = self.events.send(ScheduleEvent::Triggered {
            project_id: project_id.to_string(),
            schedule_type: "daemon",
        });
        if let Err(e) = self.instances.start_instance(&project, &service_dir).await {
            tracing::warn!(project = %project_id, error = %e, "daemon start failed");
        }
    }

    async fn fixed_rate_tick(self: &Arc<Self>, project_id: &str) {
        if self.is_shutting_down() || self.is_suppressed(project_id) {
            return;
        }
        let Some((project, service_dir)) = self.lookup(project_id) else { return };
        let Schedule::FixedRate { max_concurrent, .. } = project.schedule else { return };
        if !project.enabled || !project.valid {
            return;
        }
        if self.instances.count(Some(project_id)) >= max_concurrent as usize {
            return;
        }

        let _ = self.events.send(ScheduleEvent::Triggered {
            project_id: project_id.to_string(),
            schedule_type: "fixed_rate",
        });
        if let Err(e) = self.instances.start_instance(&project, &service_dir).await {
            tracing::warn!(project = %project_id, error = %e, "fixed_rate trigger failed");
        }
    }

    async fn on_instance_finished(self: &Arc<Self>, project_id: &str, exit_code: i32, crashed: bool) {
        if self.is_shutting_down() || self.is_suppressed(project_id) {
            return;
        }
        let Some((project, _)) = self.lookup(project_id) else { return };
        let Schedule::Daemon { restart_delay_ms, max_consecutive_failures } = project.schedule
        else {
            return;
        };
        if !project.enabled || !project.valid {
            return;
        }

        if !crashed && exit_code == 0 {
            self.state.lock().consecutive_failures.remove(project_id);
            return;
        }

        let failures = {
            let mut state = self.state.lock();
            let failures = state.consecutive_failures.entry(project_id.to_string()).or_insert(0);
            *failures += 1;
            *failures
        };

        if failures >= max_consecutive_failures {
            self.state.lock().suppressed.insert(project_id.to_string());
            tracing::warn!(project = %project_id, failures, "daemon entered crash loop, suppressed");
            let _ = self.events.send(ScheduleEvent::Suppressed {
                project_id: project_id.to_string(),
                reason: "max consecutive failures reached".to_string(),
                consecutive_failures: failures,
            });
            return;
        }

        // One-shot restart; cancelled by stop_project/stop_all.
        let token = CancellationToken::new();
        self.state.lock().timers.insert(format!("{project_id}#restart"), token.clone());
        let weak = Arc::downgrade(self);
        let id = project_id.to_string();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(Duration::from_millis(restart_delay_ms)) => {}
            }
            let Some(engine) = weak.upgrade() else { return };
            engine.state.lock().timers.remove(&format!("{id}#restart"));
            engine.start_daemon(&id).await;
        });
    }
}

impl Drop for ScheduleEngine {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.lock().take() {
            listener.abort();
        }
        for (_, token) in self.state.lock().timers.drain() {
            token.cancel();
        }
    }
}

async fn run_fixed_rate(
    engine: std::sync::Weak<ScheduleEngine>,
    project_id: String,
    interval: Duration,
    token: CancellationToken,
) {
    // First fire happens one interval after scheduling starts.
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = ticker.tick() => {}
        }
        let Some(engine) = engine.upgrade() else { return };
        engine.fixed_rate_tick(&project_id).await;
    }
}

#[cfg(test)]
#[path = "schedule_engine_tests.rs"]
mod tests;
