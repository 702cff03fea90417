// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Instance manager: launches, monitors and terminates service instances.
//!
//! Launches fail fast: no partially registered instance is ever visible.
//! Each instance owns its temp config file and guard server; both are
//! released when the instance record is dropped on finish.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::broadcast;
use uuid::Uuid;

use iolink_core::Project;
use iolink_guard::GuardServer;

/// Name of the service runner binary shipped next to the host.
pub const DEFAULT_SERVICE_RUNNER: &str = "iolink-runner";

const EVENT_CAPACITY: usize = 64;
const FINISH_POLL: Duration = Duration::from_millis(50);
const FORCE_KILL_DRAIN: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Starting,
    Running,
    Stopped,
    Failed,
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            InstanceStatus::Starting => "starting",
            InstanceStatus::Running => "running",
            InstanceStatus::Stopped => "stopped",
            InstanceStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Typed lifecycle notifications; the server manager forwards these onto
/// the JSON event bus.
#[derive(Debug, Clone)]
pub enum InstanceEvent {
    Started { instance_id: String, project_id: String, pid: u32 },
    Finished { instance_id: String, project_id: String, exit_code: i32, crashed: bool },
}

/// Read-only view of an instance for listings and the API.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSnapshot {
    pub id: String,
    pub project_id: String,
    pub service_id: String,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
    pub status: InstanceStatus,
    #[serde(skip)]
    pub working_dir: PathBuf,
    #[serde(skip)]
    pub log_path: PathBuf,
}

struct Instance {
    snapshot: InstanceSnapshot,
    command_line: Vec<String>,
    /// Owned resources, released when the record is dropped on finish.
    /// Field order keeps guard sockets dying before the temp file goes.
    guard: GuardServer,
    temp_config: tempfile::NamedTempFile,
}

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("project invalid: {0}")]
    ProjectInvalid(String),

    #[error("service directory not found: {0}")]
    ServiceDirMissing(String),

    #[error("{DEFAULT_SERVICE_RUNNER} not found")]
    ProgramNotFound,

    #[error("cannot create temp config file: {0}")]
    TempConfig(std::io::Error),

    #[error("failed to start process guard server: {0}")]
    Guard(std::io::Error),

    #[error("process failed to start: {0}")]
    SpawnFailed(std::io::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Launches and supervises service instances for the schedule engine and
/// for direct user action.
pub struct InstanceManager {
    data_root: PathBuf,
    service_program: Option<String>,
    instances: Mutex<IndexMap<String, Instance>>,
    events: broadcast::Sender<InstanceEvent>,
    guard_name_override: Mutex<Option<String>>,
}

impl InstanceManager {
    pub fn new(data_root: impl Into<PathBuf>, service_program: Option<String>) -> Arc<InstanceManager> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(InstanceManager {
            data_root: data_root.into(),
            service_program,
            instances: Mutex::new(IndexMap::new()),
            events,
            guard_name_override: Mutex::new(None),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InstanceEvent> {
        self.events.subscribe()
    }

    /// Force a fixed guard name (tests only).
    pub fn set_guard_name_for_testing(&self, name: impl Into<String>) {
        *self.guard_name_override.lock() = Some(name.into());
    }

    /// Resolve the service runner. Lookup order: configured path (absolute
    /// or relative to the data root), then the binary next to the host,
    /// then PATH.
    pub fn find_service_program(&self) -> Option<PathBuf> {
        if let Some(configured) = &self.service_program {
            let explicit = PathBuf::from(configured);
            if iolink_host::platform::is_executable(&explicit) {
                return Some(explicit);
            }
            if explicit.is_relative() {
                let under_root = self.data_root.join(&explicit);
                if iolink_host::platform::is_executable(&under_root) {
                    return Some(under_root);
                }
            }
            return None;
        }

        if let Some(bin_dir) = iolink_host::platform::host_bin_dir() {
            let sibling = bin_dir.join(DEFAULT_SERVICE_RUNNER);
            if iolink_host::platform::is_executable(&sibling) {
                return Some(sibling);
            }
        }

        let path_var = std::env::var_os("PATH")?;
        std::env::split_paths(&path_var)
            .map(|dir| dir.join(DEFAULT_SERVICE_RUNNER))
            .find(|candidate| iolink_host::platform::is_executable(candidate))
    }

    /// Launch an instance for a valid project. Returns the instance id.
    pub async fn start_instance(
        self: &Arc<Self>,
        project: &Project,
        service_dir: &Path,
    ) -> Result<String, LaunchError> {
        if !project.valid {
            return Err(LaunchError::ProjectInvalid(project.error.clone()));
        }
        if !service_dir.is_dir() {
            return Err(LaunchError::ServiceDirMissing(service_dir.display().to_string()));
        }
        let program = self.find_service_program().ok_or(LaunchError::ProgramNotFound)?;

        // Merged project config, injected through a file owned by the
        // instance.
        let mut temp_config = tempfile::NamedTempFile::new().map_err(LaunchError::TempConfig)?;
        let config_bytes = serde_json::to_vec(&serde_json::Value::Object(project.config.clone()))
            .map_err(|e| LaunchError::TempConfig(std::io::Error::other(e)))?;
        std::io::Write::write_all(&mut temp_config, &config_bytes)
            .map_err(LaunchError::TempConfig)?;
        temp_config.as_file().sync_all().map_err(LaunchError::TempConfig)?;

        let workspace_dir = self.data_root.join("workspaces").join(&project.id);
        std::fs::create_dir_all(&workspace_dir)?;
        let logs_dir = self.data_root.join("logs");
        std::fs::create_dir_all(&logs_dir)?;

        let guard = match self.guard_name_override.lock().clone() {
            Some(name) => GuardServer::start_named(&name),
            None => GuardServer::start(),
        }
        .map_err(LaunchError::Guard)?;

        let instance_id = format!("inst_{}", &Uuid::new_v4().simple().to_string()[..8]);
        let log_path = logs_dir.join(format!("{}.log", project.id));

        let mut cmd = tokio::process::Command::new(&program);
        cmd.arg(service_dir)
            .arg(format!("--config-file={}", temp_config.path().display()))
            .arg(format!("--guard={}", guard.guard_name()))
            .current_dir(&workspace_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(bin_dir) = iolink_host::platform::host_bin_dir() {
            cmd.env("PATH", iolink_host::platform::path_with_prefix(&bin_dir));
        }
        iolink_guard::prepare_command(&mut cmd);

        let mut child = cmd.spawn().map_err(LaunchError::SpawnFailed)?;
        let pid = child.id().unwrap_or(0);

        let log_file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .await?;
        let log_file = Arc::new(tokio::sync::Mutex::new(log_file));
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(pipe_log_lines(stdout, Arc::clone(&log_file), false));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pipe_log_lines(stderr, Arc::clone(&log_file), true));
        }

        let command_line = {
            let mut v = vec![program.display().to_string(), service_dir.display().to_string()];
            v.push(format!("--config-file={}", temp_config.path().display()));
            v.push(format!("--guard={}", guard.guard_name()));
            v
        };

        let instance = Instance {
            snapshot: InstanceSnapshot {
                id: instance_id.clone(),
                project_id: project.id.clone(),
                service_id: project.service_id.clone(),
                pid,
                started_at: Utc::now(),
                status: InstanceStatus::Running,
                working_dir: workspace_dir,
                log_path,
            },
            command_line,
            guard,
            temp_config,
        };
        self.instances.lock().insert(instance_id.clone(), instance);

        // `instance.started` goes out before the reaper exists, so it can
        // never race behind the matching `instance.finished`.
        let _ = self.events.send(InstanceEvent::Started {
            instance_id: instance_id.clone(),
            project_id: project.id.clone(),
            pid,
        });
        tracing::info!(instance = %instance_id, project = %project.id, pid, "instance started");

        // The reaper drives the finish path on every exit mode.
        let manager = Arc::clone(self);
        let reaper_id = instance_id.clone();
        tokio::spawn(async move {
            let (exit_code, crashed) = match child.wait().await {
                Ok(status) => (status.code().unwrap_or(-1), status.code().is_none()),
                Err(_) => (-1, true),
            };
            manager.on_finished(&reaper_id, exit_code, crashed);
        });

        Ok(instance_id)
    }

    fn on_finished(&self, instance_id: &str, exit_code: i32, crashed: bool) {
        let removed = {
            let mut instances = self.instances.lock();
            let Some(mut instance) = instances.shift_remove(instance_id) else { return };
            let abnormal = crashed || exit_code != 0;
            instance.snapshot.status =
                if abnormal { InstanceStatus::Failed } else { InstanceStatus::Stopped };
            instance
        };

        tracing::info!(
            instance = %instance_id,
            project = %removed.snapshot.project_id,
            exit_code,
            crashed,
            status = %removed.snapshot.status,
            "instance finished"
        );
        let _ = self.events.send(InstanceEvent::Finished {
            instance_id: instance_id.to_string(),
            project_id: removed.snapshot.project_id.clone(),
            exit_code,
            crashed,
        });
        // `removed` drops here: guard sockets close, then the temp config
        // file is deleted.
    }

    /// Hard-kill one instance. Services get their polite shutdown through
    /// the guard channel dropping, not through signals.
    pub fn terminate_instance(&self, instance_id: &str) -> bool {
        let pid = {
            let instances = self.instances.lock();
            match instances.get(instance_id) {
                Some(instance) => instance.snapshot.pid,
                None => return false,
            }
        };
        kill_pid(pid);
        true
    }

    pub fn terminate_by_project(&self, project_id: &str) {
        let ids: Vec<String> = {
            let instances = self.instances.lock();
            instances
                .values()
                .filter(|i| i.snapshot.project_id == project_id)
                .map(|i| i.snapshot.id.clone())
                .collect()
        };
        for id in ids {
            self.terminate_instance(&id);
        }
    }

    pub fn terminate_all(&self) {
        let ids: Vec<String> =
            self.instances.lock().values().map(|i| i.snapshot.id.clone()).collect();
        for id in ids {
            self.terminate_instance(&id);
        }
    }

    /// Poll for quiescence within the grace window, then force-kill the
    /// stragglers and drain their finish events for up to a second.
    pub async fn wait_all_finished(&self, grace: Duration) {
        let deadline = tokio::time::Instant::now() + grace;
        while tokio::time::Instant::now() < deadline {
            if self.instances.lock().is_empty() {
                return;
            }
            tokio::time::sleep(FINISH_POLL).await;
        }

        self.terminate_all();
        let drain_deadline = tokio::time::Instant::now() + FORCE_KILL_DRAIN;
        while tokio::time::Instant::now() < drain_deadline {
            if self.instances.lock().is_empty() {
                return;
            }
            tokio::time::sleep(FINISH_POLL).await;
        }
    }

    pub fn list(&self, project_id: Option<&str>) -> Vec<InstanceSnapshot> {
        self.instances
            .lock()
            .values()
            .filter(|i| project_id.map_or(true, |p| i.snapshot.project_id == p))
            .map(|i| i.snapshot.clone())
            .collect()
    }

    pub fn get(&self, instance_id: &str) -> Option<InstanceSnapshot> {
        self.instances.lock().get(instance_id).map(|i| i.snapshot.clone())
    }

    pub fn command_line(&self, instance_id: &str) -> Option<Vec<String>> {
        self.instances.lock().get(instance_id).map(|i| i.command_line.clone())
    }

    pub fn count(&self, project_id: Option<&str>) -> usize {
        match project_id {
            None => self.instances.lock().len(),
            Some(p) => {
                self.instances.lock().values().filter(|i| i.snapshot.project_id == p).count()
            }
        }
    }
}

fn kill_pid(pid: u32) {
    if pid == 0 {
        return;
    }
    let _ = nix::sys::signal::kill(
        nix::unistd::Pid::from_raw(pid as i32),
        nix::sys::signal::Signal::SIGKILL,
    );
}

/// Copy child output into the project log, one timestamped line at a time.
async fn pipe_log_lines<R>(
    reader: R,
    log_file: Arc<tokio::sync::Mutex<tokio::fs::File>>,
    is_stderr: bool,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let ts = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let prefixed = if is_stderr {
            format!("{ts} | [stderr] {line}\n")
        } else {
            format!("{ts} | {line}\n")
        };
        let mut file = log_file.lock().await;
        let _ = file.write_all(prefixed.as_bytes()).await;
        let _ = file.flush().await;
    }
}

#[cfg(test)]
#[path = "instance_tests.rs"]
mod tests;
