// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! DriverLab WebSocket bridge: a one-to-one session between a client and
//! a catalog-resolved driver process.
//!
//! The driver always runs in the `keepalive` profile; the WS `runMode`
//! only governs what happens when the driver exits. The first terminal
//! `done` frame answers the session's own `meta.describe` query and is
//! absorbed into a `{type:"meta"}` envelope instead of being forwarded as
//! stdout.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::Response;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::io::AsyncReadExt;
use tokio::process::ChildStdin;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use iolink_wire::{parse_header, parse_payload, LineFramer, Status};

use crate::app::AppState;
use crate::error::ApiError;

const META_TIMEOUT: Duration = Duration::from_secs(5);
const RAPID_CRASH_WINDOW: Duration = Duration::from_secs(2);
const MAX_RAPID_CRASHES: u32 = 3;

#[derive(Debug, Deserialize)]
pub struct DriverLabQuery {
    #[serde(rename = "runMode")]
    pub run_mode: Option<String>,
    pub args: Option<String>,
}

pub async fn driverlab_ws(
    State(state): State<AppState>,
    Path(driver_id): Path<String>,
    Query(query): Query<DriverLabQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let config = state
        .manager
        .driver_catalog()
        .get(&driver_id)
        .ok_or_else(|| ApiError::not_found("driver not found"))?;

    let run_mode = query.run_mode.unwrap_or_else(|| "keepalive".to_string());
    if run_mode != "keepalive" && run_mode != "oneshot" {
        return Err(ApiError::bad_request("runMode must be oneshot or keepalive"));
    }
    let extra_args = parse_extra_args(query.args.as_deref());

    let session = Session {
        driver_id,
        program: config.program.clone(),
        run_mode,
        extra_args,
        shutdown: state.manager.shutdown_token(),
        stdin: None,
        output_rx: None,
        pid: 0,
        meta: MetaAbsorber::new(),
        meta_deadline: None,
        pending_exec: None,
        restarting: false,
        restart_suppressed: false,
        last_start: None,
        consecutive_fast_exits: 0,
    };
    Ok(ws.on_upgrade(move |socket| session.run(socket)))
}

fn parse_extra_args(args: Option<&str>) -> Vec<String> {
    args.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

enum DriverOutput {
    Line(Vec<u8>),
    Exited { exit_code: i32, crashed: bool },
}

struct Session {
    driver_id: String,
    program: PathBuf,
    run_mode: String,
    extra_args: Vec<String>,
    shutdown: CancellationToken,

    stdin: Option<ChildStdin>,
    output_rx: Option<mpsc::Receiver<DriverOutput>>,
    pid: u32,
    meta: MetaAbsorber,
    meta_deadline: Option<tokio::time::Instant>,
    pending_exec: Option<Vec<u8>>,
    restarting: bool,
    restart_suppressed: bool,
    last_start: Option<std::time::Instant>,
    consecutive_fast_exits: u32,
}

impl Session {
    async fn run(mut self, mut socket: WebSocket) {
        if !self.start_driver(&mut socket).await {
            let _ = socket.close().await;
            return;
        }

        loop {
            let shutdown = self.shutdown.clone();
            let meta_at = self
                .meta_deadline
                .unwrap_or_else(|| tokio::time::Instant::now() + Duration::from_secs(3600));

            tokio::select! {
                _ = shutdown.cancelled() => break,

                incoming = socket.recv() => {
                    match incoming {
                        Some(Ok(message)) => {
                            if !self.on_ws_message(message, &mut socket).await {
                                break;
                            }
                        }
                        _ => break,
                    }
                }

                output = next_output(&mut self.output_rx) => {
                    match output {
                        Some(DriverOutput::Line(line)) => {
                            self.on_stdout_line(&line, &mut socket).await;
                        }
                        Some(DriverOutput::Exited { exit_code, crashed }) => {
                            if !self.on_driver_exited(exit_code, crashed, &mut socket).await {
                                break;
                            }
                        }
                        None => self.output_rx = None,
                    }
                }

                _ = tokio::time::sleep_until(meta_at), if self.meta_deadline.is_some() => {
                    self.meta_deadline = None;
                    if !self.meta.is_done() {
                        self.meta.finish();
                        send_json(
                            &mut socket,
                            &json!({"type": "error", "message": "meta query timed out"}),
                        )
                        .await;
                    }
                }
            }
        }

        self.stop_driver();
        let _ = socket.close().await;
    }

    /// Spawn the driver, announce it and issue the meta query.
    async fn start_driver(&mut self, socket: &mut WebSocket) -> bool {
        self.meta = MetaAbsorber::new();
        self.meta_deadline = None;

        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.arg("--profile=keepalive")
            .args(&self.extra_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                send_json(
                    socket,
                    &json!({"type": "error", "message": format!("driver failed to start: {e}")}),
                )
                .await;
                return false;
            }
        };

        self.pid = child.id().unwrap_or(0);
        self.stdin = child.stdin.take();
        let stdout = child.stdout.take();

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            let mut framer = LineFramer::new();
            if let Some(mut stdout) = stdout {
                let mut buf = [0u8; 8192];
                loop {
                    match stdout.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            framer.append(&buf[..n]);
                            while let Some(line) = framer.try_read_line() {
                                if line.iter().any(|b| !b.is_ascii_whitespace()) {
                                    if tx.send(DriverOutput::Line(line)).await.is_err() {
                                        return;
                                    }
                                }
                            }
                        }
                    }
                }
            }
            let (exit_code, crashed) = match child.wait().await {
                Ok(status) => (status.code().unwrap_or(-1), status.code().is_none()),
                Err(_) => (-1, true),
            };
            let _ = tx.send(DriverOutput::Exited { exit_code, crashed }).await;
        });
        self.output_rx = Some(rx);
        self.last_start = Some(std::time::Instant::now());

        send_json(socket, &json!({"type": "driver.started", "pid": self.pid})).await;
        if self.restarting {
            self.restarting = false;
            send_json(
                socket,
                &json!({
                    "type": "driver.restarted",
                    "pid": self.pid,
                    "reason": "oneshot auto-restart on new exec",
                }),
            )
            .await;
        }

        // Ask the driver to describe itself; a missing answer is an error
        // message, not a closed socket.
        if let Ok(line) = iolink_wire::serialize_request("meta.describe", Some(&json!({}))) {
            self.write_to_driver(&line, socket).await;
        }
        self.meta_deadline = Some(tokio::time::Instant::now() + META_TIMEOUT);

        if let Some(pending) = self.pending_exec.take() {
            self.write_to_driver(&pending, socket).await;
        }
        true
    }

    async fn write_to_driver(&mut self, line: &[u8], socket: &mut WebSocket) {
        let Some(stdin) = self.stdin.as_mut() else {
            send_json(socket, &json!({"type": "error", "message": "driver is not running"})).await;
            return;
        };
        if tokio::io::AsyncWriteExt::write_all(stdin, line).await.is_err()
            || tokio::io::AsyncWriteExt::flush(stdin).await.is_err()
        {
            send_json(socket, &json!({"type": "error", "message": "driver stdin write failed"}))
                .await;
        }
    }

    async fn on_ws_message(&mut self, message: WsMessage, socket: &mut WebSocket) -> bool {
        let text = match message {
            WsMessage::Text(text) => text,
            WsMessage::Close(_) => return false,
            _ => return true,
        };

        let Some(request) = serde_json::from_str::<Value>(&text).ok().filter(Value::is_object)
        else {
            send_json(socket, &json!({"type": "error", "message": "invalid JSON"})).await;
            return true;
        };

        match request.get("type").and_then(Value::as_str).unwrap_or_default() {
            "exec" => self.handle_exec(&request, socket).await,
            "cancel" => {
                // Closing the write channel is the protocol's only cancel.
                self.stdin = None;
            }
            other => {
                send_json(
                    socket,
                    &json!({"type": "error", "message": format!("unknown message type: {other}")}),
                )
                .await;
            }
        }
        true
    }

    async fn handle_exec(&mut self, request: &Value, socket: &mut WebSocket) {
        let mut cmd_obj = Map::new();
        cmd_obj.insert("cmd".to_string(), request.get("cmd").cloned().unwrap_or(Value::Null));
        if let Some(data) = request.get("data") {
            cmd_obj.insert("data".to_string(), data.clone());
        }
        let mut line = match serde_json::to_vec(&Value::Object(cmd_obj)) {
            Ok(line) => line,
            Err(_) => return,
        };
        line.push(b'\n');

        if self.stdin.is_none() {
            if self.run_mode == "oneshot" {
                if self.restart_suppressed {
                    send_json(
                        socket,
                        &json!({
                            "type": "error",
                            "message":
                                "auto-restart suppressed due to rapid crashes, reconnect to reset",
                        }),
                    )
                    .await;
                    return;
                }
                self.pending_exec = Some(line);
                self.restarting = true;
                self.start_driver(socket).await;
            } else {
                send_json(socket, &json!({"type": "error", "message": "driver is not running"}))
                    .await;
            }
            return;
        }

        self.write_to_driver(&line, socket).await;
    }

    async fn on_stdout_line(&mut self, line: &[u8], socket: &mut WebSocket) {
        match self.meta.on_line(line) {
            LineAction::Absorb => {}
            LineAction::EmitMeta(meta) => {
                self.meta_deadline = None;
                send_json(
                    socket,
                    &json!({
                        "type": "meta",
                        "driverId": self.driver_id,
                        "pid": self.pid,
                        "runMode": self.run_mode,
                        "meta": meta,
                    }),
                )
                .await;
            }
            LineAction::Forward => {
                let parsed = serde_json::from_slice::<Value>(line).ok();
                let message = match parsed {
                    Some(value) if value.is_object() => value,
                    _ => Value::String(String::from_utf8_lossy(line).trim().to_string()),
                };
                send_json(socket, &json!({"type": "stdout", "message": message})).await;
            }
        }
    }

    /// Returns false when the session should end (keepalive mode).
    async fn on_driver_exited(
        &mut self,
        exit_code: i32,
        crashed: bool,
        socket: &mut WebSocket,
    ) -> bool {
        self.stdin = None;
        self.output_rx = None;
        self.pid = 0;

        send_json(
            socket,
            &json!({
                "type": "driver.exited",
                "exitCode": exit_code,
                "exitStatus": if crashed { "crash" } else { "normal" },
                "reason": if crashed { "process crashed" } else { "process exited" },
            }),
        )
        .await;

        if self.run_mode == "keepalive" {
            return false;
        }

        // Oneshot: the socket stays open; the next exec restarts the
        // driver unless it is crash-looping.
        let rapid = self
            .last_start
            .map(|started| started.elapsed() < RAPID_CRASH_WINDOW)
            .unwrap_or(false);
        if rapid {
            self.consecutive_fast_exits += 1;
        } else {
            self.consecutive_fast_exits = 1;
        }

        if self.consecutive_fast_exits >= MAX_RAPID_CRASHES {
            self.restart_suppressed = true;
            send_json(
                socket,
                &json!({
                    "type": "error",
                    "message": format!(
                        "driver crashed {MAX_RAPID_CRASHES} times rapidly, auto-restart suppressed"
                    ),
                }),
            )
            .await;
        }
        true
    }

    fn stop_driver(&mut self) {
        self.stdin = None;
        self.output_rx = None;
        if self.pid != 0 {
            let pid = nix::unistd::Pid::from_raw(self.pid as i32);
            let _ = nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGTERM);
            // Escalate if the polite signal is ignored.
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(3)).await;
                let _ = nix::sys::signal::kill(pid, nix::sys::signal::Signal::SIGKILL);
            });
        }
    }
}

async fn next_output(rx: &mut Option<mpsc::Receiver<DriverOutput>>) -> Option<DriverOutput> {
    match rx.as_mut() {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn send_json(socket: &mut WebSocket, value: &Value) {
    if let Ok(text) = serde_json::to_string(value) {
        let _ = socket.send(WsMessage::Text(text)).await;
    }
}

// ── Meta absorption ─────────────────────────────────────────────────

enum LineAction {
    /// A header belonging to the pending meta response; nothing emitted.
    Absorb,
    /// The meta payload arrived.
    EmitMeta(Value),
    /// A regular stdout line.
    Forward,
}

/// Tracks the two-line frame answering the session's `meta.describe`
/// query. The first terminal `done` header and its payload line are
/// swallowed; a first `error` header releases the stream to plain
/// forwarding.
struct MetaAbsorber {
    state: MetaState,
}

#[derive(PartialEq)]
enum MetaState {
    AwaitingHeader,
    AwaitingPayload,
    Done,
}

impl MetaAbsorber {
    fn new() -> Self {
        MetaAbsorber { state: MetaState::AwaitingHeader }
    }

    fn is_done(&self) -> bool {
        self.state == MetaState::Done
    }

    fn finish(&mut self) {
        self.state = MetaState::Done;
    }

    fn on_line(&mut self, line: &[u8]) -> LineAction {
        match self.state {
            MetaState::Done => LineAction::Forward,
            MetaState::AwaitingPayload => {
                self.state = MetaState::Done;
                LineAction::EmitMeta(parse_payload(line))
            }
            MetaState::AwaitingHeader => match parse_header(line) {
                Ok(header) if header.status == Status::Done => {
                    self.state = MetaState::AwaitingPayload;
                    LineAction::Absorb
                }
                Ok(header) if header.status == Status::Error => {
                    // The driver does not support meta; forward verbatim.
                    self.state = MetaState::Done;
                    LineAction::Forward
                }
                _ => LineAction::Forward,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_done_frame_is_absorbed_and_emitted_as_meta() {
        let mut absorber = MetaAbsorber::new();
        assert!(matches!(
            absorber.on_line(b"{\"status\":\"done\",\"code\":0}"),
            LineAction::Absorb
        ));
        match absorber.on_line(b"{\"info\":{\"id\":\"d1\"}}") {
            LineAction::EmitMeta(meta) => assert_eq!(meta["info"]["id"], "d1"),
            _ => panic!("expected EmitMeta"),
        }
        // Everything after is plain stdout.
        assert!(matches!(
            absorber.on_line(b"{\"status\":\"done\",\"code\":0}"),
            LineAction::Forward
        ));
    }

    #[test]
    fn meta_error_header_releases_the_stream() {
        let mut absorber = MetaAbsorber::new();
        assert!(matches!(
            absorber.on_line(b"{\"status\":\"error\",\"code\":501}"),
            LineAction::Forward
        ));
        assert!(absorber.is_done());
    }

    #[test]
    fn non_frame_lines_are_forwarded_while_waiting() {
        let mut absorber = MetaAbsorber::new();
        assert!(matches!(absorber.on_line(b"log line"), LineAction::Forward));
        assert!(!absorber.is_done());
        // The meta frame can still arrive afterwards.
        assert!(matches!(
            absorber.on_line(b"{\"status\":\"done\",\"code\":0}"),
            LineAction::Absorb
        ));
    }

    #[test]
    fn event_headers_do_not_end_the_wait() {
        let mut absorber = MetaAbsorber::new();
        assert!(matches!(
            absorber.on_line(b"{\"status\":\"event\",\"code\":0}"),
            LineAction::Forward
        ));
        assert!(!absorber.is_done());
    }

    #[yare::parameterized(
        empty = { None, 0 },
        one = { Some("--verbose"), 1 },
        several = { Some("a,b,c"), 3 },
        blanks_skipped = { Some("a,,b, "), 2 },
    )]
    fn extra_args_parsing(input: Option<&str>, expected: usize) {
        assert_eq!(parse_extra_args(input).len(), expected);
    }
}
