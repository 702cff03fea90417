// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Driver host: spawns a driver process and pumps its stdout into the
//! current task.
//!
//! One pump task per driver decodes the header/payload alternation and
//! feeds the task associated with the outstanding request. Exactly one
//! task is active at a time; a new request resets the receive state.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Notify;

use iolink_wire::{
    parse_header, parse_payload, serialize_request, FrameHeader, LineFramer, Message, Status,
    CODE_DRIVER_EXITED, CODE_INVALID_FRAME,
};

use crate::task::{Task, TaskState};

/// How the child ended, for the 1001 exit context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    pub code: Option<i32>,
    /// Terminated by a signal rather than a normal exit.
    pub crashed: bool,
}

impl ExitInfo {
    fn from_status(status: std::process::ExitStatus) -> ExitInfo {
        ExitInfo { code: status.code(), crashed: status.code().is_none() }
    }

    pub fn status_str(&self) -> &'static str {
        if self.crashed {
            "crashed"
        } else {
            "normal"
        }
    }
}

/// State shared between the driver handle, its pump task and its tasks.
pub(crate) struct DriverShared {
    pump: Mutex<PumpState>,
    wake: Notify,
    exit: Mutex<Option<ExitInfo>>,
    program: String,
}

struct PumpState {
    framer: LineFramer,
    expect_header: bool,
    header: Option<FrameHeader>,
    current: Option<Arc<TaskState>>,
}

impl DriverShared {
    fn new(program: String) -> Arc<DriverShared> {
        Arc::new(DriverShared {
            pump: Mutex::new(PumpState {
                framer: LineFramer::new(),
                expect_header: true,
                header: None,
                current: None,
            }),
            wake: Notify::new(),
            exit: Mutex::new(None),
            program,
        })
    }

    /// A shared block with no process behind it, for task-level tests.
    #[cfg(test)]
    pub(crate) fn detached() -> Arc<DriverShared> {
        let shared = DriverShared::new("<detached>".to_string());
        *shared.exit.lock() = Some(ExitInfo { code: Some(0), crashed: false });
        shared
    }

    pub(crate) fn notified(&self) -> tokio::sync::futures::Notified<'_> {
        self.wake.notified()
    }

    pub(crate) fn exit_info(&self) -> Option<ExitInfo> {
        *self.exit.lock()
    }

    fn exit_context(&self, info: Option<ExitInfo>) -> String {
        match info {
            Some(info) => format!(
                "program={}, exitCode={}, exitStatus={}",
                self.program,
                info.code.unwrap_or(-1),
                info.status_str()
            ),
            None => format!("program={}, exitCode=-1, exitStatus=unknown", self.program),
        }
    }

    /// Decode buffered stdout bytes into messages for the current task.
    fn ingest(&self, data: &[u8]) {
        let mut pump = self.pump.lock();
        pump.framer.append(data);

        while let Some(line) = pump.framer.try_read_line() {
            let Some(task) = pump.current.clone() else {
                // Output with no outstanding request is dropped unread.
                continue;
            };

            if pump.expect_header {
                match parse_header(&line) {
                    Ok(header) => {
                        pump.header = Some(header);
                        pump.expect_header = false;
                    }
                    Err(_) => {
                        task.push(Message {
                            status: Status::Error,
                            code: CODE_INVALID_FRAME,
                            payload: json!({
                                "message": "invalid header",
                                "raw": String::from_utf8_lossy(&line),
                            }),
                        });
                        // The stream is unsynchronized from here on; stop
                        // decoding until the next request resets us.
                        pump.framer.clear();
                        return;
                    }
                }
            } else {
                let payload = parse_payload(&line);
                let header = pump.header.take().unwrap_or(FrameHeader {
                    status: Status::Error,
                    code: CODE_INVALID_FRAME,
                });
                task.push(Message { status: header.status, code: header.code, payload });
                pump.expect_header = true;
            }
        }
    }

    /// Called once by the pump after the child has been reaped.
    fn on_process_exited(&self, info: ExitInfo) {
        *self.exit.lock() = Some(info);
        let current = self.pump.lock().current.clone();
        if let Some(task) = current {
            if !task.is_terminal() {
                let context = self.exit_context(Some(info));
                task.push(Message {
                    status: Status::Error,
                    code: CODE_DRIVER_EXITED,
                    payload: json!({
                        "message": format!(
                            "driver process exited without sending a response: {context}"
                        ),
                    }),
                });
            }
        }
    }
}

/// A supervised driver process answering JSONL requests on stdin/stdout.
pub struct Driver {
    program: String,
    pid: Option<u32>,
    stdin: Option<ChildStdin>,
    shared: Arc<DriverShared>,
}

impl Driver {
    /// Spawn the driver with separated stdio channels and start its pump.
    pub async fn start(
        program: impl Into<String>,
        args: &[String],
    ) -> std::io::Result<Driver> {
        let program = program.into();
        let mut cmd = Command::new(&program);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());

        let mut child = cmd.spawn()?;
        let pid = child.id();
        let stdin = child.stdin.take();
        let stdout = child.stdout.take().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "driver stdout not captured")
        })?;

        let shared = DriverShared::new(program.clone());
        tokio::spawn(pump(child, stdout, Arc::clone(&shared)));

        tracing::debug!(program = %program, pid = ?pid, "driver started");
        Ok(Driver { program, pid, stdin, shared })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn is_running(&self) -> bool {
        self.shared.exit_info().is_none()
    }

    pub fn exit_info(&self) -> Option<ExitInfo> {
        self.shared.exit_info()
    }

    /// Issue a request. Allocates a fresh task, writes the request line and
    /// resets the framer to expect a header. The previous task, if any, is
    /// abandoned by the pump.
    pub async fn request(&mut self, cmd: &str, data: Option<&Value>) -> std::io::Result<Task> {
        let state = TaskState::new();
        {
            let mut pump = self.shared.pump.lock();
            pump.current = Some(Arc::clone(&state));
            pump.expect_header = true;
            pump.header = None;
            pump.framer.clear();
        }

        let line = serialize_request(cmd, data)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let stdin = self.stdin.as_mut().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "driver stdin closed")
        })?;
        tokio::io::AsyncWriteExt::write_all(stdin, &line).await?;
        tokio::io::AsyncWriteExt::flush(stdin).await?;

        Ok(Task::new(state, Arc::clone(&self.shared)))
    }

    /// Close the write channel. The only cancellation the protocol offers.
    pub fn close_stdin(&mut self) {
        self.stdin = None;
    }

    /// Polite termination: SIGTERM, up to one second of grace, then
    /// SIGKILL.
    pub async fn terminate(&mut self) {
        if !self.is_running() {
            return;
        }
        self.signal(nix::sys::signal::Signal::SIGTERM);
        if !self.wait_exit(Duration::from_secs(1)).await {
            self.signal(nix::sys::signal::Signal::SIGKILL);
            let _ = self.wait_exit(Duration::from_secs(1)).await;
        }
    }

    async fn wait_exit(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.shared.notified();
            if !self.is_running() {
                return true;
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => return !self.is_running(),
            }
        }
    }

    fn signal(&self, signal: nix::sys::signal::Signal) {
        if let Some(pid) = self.pid {
            let _ = nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), signal);
        }
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        // Drop cannot await the polite path; guarantee the kill instead.
        if self.is_running() {
            self.signal(nix::sys::signal::Signal::SIGKILL);
        }
    }
}

/// Reads stdout to EOF, then reaps the child and records its exit.
async fn pump(mut child: Child, mut stdout: ChildStdout, shared: Arc<DriverShared>) {
    let mut buf = [0u8; 8192];
    loop {
        match stdout.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                shared.ingest(&buf[..n]);
                shared.wake.notify_waiters();
            }
            Err(e) => {
                tracing::debug!(error = %e, "driver stdout read failed");
                break;
            }
        }
    }

    let info = match child.wait().await {
        Ok(status) => ExitInfo::from_status(status),
        Err(_) => ExitInfo { code: None, crashed: true },
    };
    shared.on_process_exited(info);
    shared.wake.notify_waiters();
}

#[cfg(test)]
#[path = "driver_tests.rs"]
mod tests;
