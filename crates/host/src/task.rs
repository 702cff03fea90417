// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task state: one outstanding request against one driver.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::time::Instant;

use iolink_wire::Message;

use crate::driver::DriverShared;

/// Shared state between the driver's pump (producer) and the awaiting
/// caller (single consumer).
pub struct TaskState {
    inner: Mutex<TaskInner>,
}

#[derive(Default)]
struct TaskInner {
    terminal: bool,
    exit_code: i32,
    error_text: String,
    final_payload: Value,
    queue: VecDeque<Message>,
}

impl TaskState {
    pub(crate) fn new() -> Arc<TaskState> {
        Arc::new(TaskState { inner: Mutex::new(TaskInner::default()) })
    }

    /// Enqueue a message, transitioning to terminal when it is `done` or
    /// `error`. Messages after the terminal one are dropped — a task
    /// completes exactly once.
    pub(crate) fn push(&self, msg: Message) {
        let mut inner = self.inner.lock();
        if inner.terminal {
            return;
        }
        if msg.is_terminal() {
            inner.terminal = true;
            inner.exit_code = msg.code;
            inner.final_payload = msg.payload.clone();
            if msg.status == iolink_wire::Status::Error {
                if let Some(text) = msg.payload.get("message").and_then(Value::as_str) {
                    inner.error_text = text.to_string();
                }
            }
        }
        inner.queue.push_back(msg);
    }

    pub(crate) fn is_terminal(&self) -> bool {
        self.inner.lock().terminal
    }
}

/// Handle on one outstanding request and its message stream.
///
/// The task and its driver are exclusively associated for the task's
/// lifetime; issuing a new request on the driver resets the receive state.
pub struct Task {
    state: Arc<TaskState>,
    driver: Arc<DriverShared>,
}

impl Task {
    pub(crate) fn new(state: Arc<TaskState>, driver: Arc<DriverShared>) -> Task {
        Task { state, driver }
    }

    pub(crate) fn driver_shared(&self) -> &Arc<DriverShared> {
        &self.driver
    }

    /// Dequeue the next message without blocking.
    pub fn try_next(&self) -> Option<Message> {
        self.state.inner.lock().queue.pop_front()
    }

    pub fn has_queued(&self) -> bool {
        !self.state.inner.lock().queue.is_empty()
    }

    /// Terminal response received and every message consumed.
    pub fn is_done(&self) -> bool {
        let inner = self.state.inner.lock();
        inner.terminal && inner.queue.is_empty()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Terminal code, or -1 while the task is still in flight.
    pub fn exit_code(&self) -> i32 {
        let inner = self.state.inner.lock();
        if inner.terminal {
            inner.exit_code
        } else {
            -1
        }
    }

    pub fn error_text(&self) -> String {
        self.state.inner.lock().error_text.clone()
    }

    pub fn final_payload(&self) -> Value {
        self.state.inner.lock().final_payload.clone()
    }

    /// Block until a message arrives, the task completes with an empty
    /// queue, or the timeout elapses. A driver that dies mid-request
    /// surfaces here as a synthesized `error`/1001 terminal message.
    pub async fn wait_next(&self, timeout: Duration) -> Option<Message> {
        let deadline = Instant::now() + timeout;
        loop {
            // Register for the wakeup before checking state, so a message
            // pushed between the check and the await still wakes us.
            let notified = self.driver.notified();

            if let Some(msg) = self.try_next() {
                return Some(msg);
            }
            if self.is_done() {
                return None;
            }

            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => return self.try_next(),
            }
        }
    }
}
