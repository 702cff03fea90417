// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wait-any selector: block until any of N tasks yields a message or all
//! are complete.

use std::time::Duration;

use futures_util::future::select_all;
use iolink_wire::Message;
use tokio::time::Instant;

use crate::task::Task;

/// Interval at which an external break flag is polled while blocked.
const BREAK_POLL: Duration = Duration::from_millis(50);

/// A message together with the index of the task that produced it.
#[derive(Debug)]
pub struct AnyMessage {
    pub task_index: usize,
    pub message: Message,
}

/// Wait until any task has a message queued, or every task is terminal and
/// drained, or the timeout elapses, or `break_flag` returns true.
///
/// At most one message is consumed per call. When several tasks are ready
/// any of them may be chosen; this is not a fair scheduler.
pub async fn wait_any(
    tasks: &[Task],
    timeout: Duration,
    break_flag: Option<&(dyn Fn() -> bool + Sync)>,
) -> Option<AnyMessage> {
    if tasks.is_empty() {
        return None;
    }
    let deadline = Instant::now() + timeout;

    loop {
        // Register every wakeup before inspecting queues so nothing pushed
        // in between is missed.
        let wakeups: Vec<_> =
            tasks.iter().map(|t| Box::pin(t.driver_shared().notified())).collect();

        if let Some(found) = poll_queues(tasks) {
            return Some(found);
        }
        if tasks.iter().all(Task::is_done) {
            return None;
        }
        if let Some(flag) = break_flag {
            if flag() {
                return poll_queues(tasks);
            }
        }

        let now = Instant::now();
        if now >= deadline {
            return poll_queues(tasks);
        }
        let tick = std::cmp::min(deadline, now + BREAK_POLL);

        tokio::select! {
            _ = select_all(wakeups) => {}
            _ = tokio::time::sleep_until(tick) => {}
        }
    }
}

fn poll_queues(tasks: &[Task]) -> Option<AnyMessage> {
    for (task_index, task) in tasks.iter().enumerate() {
        if let Some(message) = task.try_next() {
            return Some(AnyMessage { task_index, message });
        }
    }
    None
}

#[cfg(test)]
#[path = "wait_any_tests.rs"]
mod tests;
