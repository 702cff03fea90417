// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Rotating JSONL persistence for bus events.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tokio::task::JoinHandle;

use crate::event_bus::EventBus;

/// Backward tail queries stop reading after this many bytes.
const MAX_QUERY_READ_BYTES: u64 = 4 * 1024 * 1024;

/// Bus subscriber that appends one compact JSON line per event to a
/// size-capped, N-file-rotated log.
pub struct EventLog {
    inner: Arc<LogInner>,
    writer_task: JoinHandle<()>,
}

struct LogInner {
    path: PathBuf,
    max_bytes: u64,
    max_files: usize,
}

impl EventLog {
    /// Subscribe to the bus and start persisting. `max_files` counts the
    /// active file plus its rotated predecessors.
    pub fn start(path: impl Into<PathBuf>, bus: &EventBus, max_bytes: u64, max_files: usize) -> EventLog {
        let inner = Arc::new(LogInner { path: path.into(), max_bytes, max_files: max_files.max(1) });
        let mut rx = bus.subscribe();
        let writer = Arc::clone(&inner);
        let writer_task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if let Ok(line) = serde_json::to_vec(&event) {
                            writer.append(&line);
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "event log fell behind the bus");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        EventLog { inner, writer_task }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Tail query, newest first: up to `limit` events matching the type
    /// prefix and projectId filters, scanning backwards over at most the
    /// last 4 MiB of the active file.
    pub fn query(&self, limit: usize, type_prefix: Option<&str>, project_id: Option<&str>) -> Vec<Value> {
        let Ok(mut file) = std::fs::File::open(&self.inner.path) else {
            return Vec::new();
        };
        let size = file.metadata().map(|m| m.len()).unwrap_or(0);
        let start = size.saturating_sub(MAX_QUERY_READ_BYTES);
        use std::io::{Read, Seek, SeekFrom};
        if file.seek(SeekFrom::Start(start)).is_err() {
            return Vec::new();
        }
        let mut data = Vec::new();
        if file.read_to_end(&mut data).is_err() {
            return Vec::new();
        }

        let mut results = Vec::new();
        for line in data.split(|&b| b == b'\n').rev() {
            if results.len() >= limit {
                break;
            }
            if line.is_empty() {
                continue;
            }
            let Ok(value) = serde_json::from_slice::<Value>(line) else { continue };
            if !value.is_object() {
                continue;
            }
            if let Some(prefix) = type_prefix {
                let matches = value
                    .get("type")
                    .and_then(Value::as_str)
                    .map(|t| t.starts_with(prefix))
                    .unwrap_or(false);
                if !matches {
                    continue;
                }
            }
            if let Some(pid) = project_id {
                let matches = value
                    .get("data")
                    .and_then(|d| d.get("projectId"))
                    .and_then(Value::as_str)
                    .map(|p| p == pid)
                    .unwrap_or(false);
                if !matches {
                    continue;
                }
            }
            results.push(value);
        }
        results
    }
}

impl Drop for EventLog {
    fn drop(&mut self) {
        self.writer_task.abort();
    }
}

impl LogInner {
    fn append(&self, line: &[u8]) {
        let current_size = std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        if current_size > 0 && current_size + line.len() as u64 + 1 > self.max_bytes {
            rotate(&self.path, self.max_files);
        }

        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut f| {
                f.write_all(line)?;
                f.write_all(b"\n")
            });
        if let Err(e) = result {
            tracing::warn!(error = %e, path = %self.path.display(), "event log write failed");
        }
    }
}

/// Shift `log`, `log.1`, ... up by one, dropping the oldest so at most
/// `max_files` files remain.
fn rotate(path: &Path, max_files: usize) {
    let numbered = |n: usize| -> PathBuf {
        let mut name = path.as_os_str().to_os_string();
        name.push(format!(".{n}"));
        PathBuf::from(name)
    };

    if max_files <= 1 {
        let _ = std::fs::remove_file(path);
        return;
    }

    let oldest = numbered(max_files - 1);
    if oldest.exists() {
        let _ = std::fs::remove_file(&oldest);
    }
    for n in (1..max_files - 1).rev() {
        let src = numbered(n);
        if src.exists() {
            let _ = std::fs::rename(&src, numbered(n + 1));
        }
    }
    let _ = std::fs::rename(path, numbered(1));
}

#[cfg(test)]
#[path = "event_log_tests.rs"]
mod tests;
