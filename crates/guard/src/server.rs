// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Guard server: the parent-side endpoint of the IPC watchdog.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// A local socket server whose sole purpose is to exist. Children connect
/// and watch the connection; the server never writes.
///
/// The server owns its accepted sockets. Drop order is connections first,
/// then the listener, then the socket file.
pub struct GuardServer {
    name: String,
    path: PathBuf,
    connections: Arc<Mutex<Vec<UnixStream>>>,
    accept_task: JoinHandle<()>,
}

impl GuardServer {
    /// Bind under a freshly generated name. Must be called on a tokio
    /// runtime.
    pub fn start() -> io::Result<GuardServer> {
        let name = format!("iolink_guard_{}", Uuid::new_v4().simple());
        Self::start_named(&name)
    }

    /// Bind under an explicit name (used by tests).
    pub fn start_named(name: &str) -> io::Result<GuardServer> {
        let path = std::env::temp_dir().join(format!("{name}.sock"));
        // A stale socket from a dead process would make bind fail.
        let _ = std::fs::remove_file(&path);
        let listener = UnixListener::bind(&path)?;

        let connections: Arc<Mutex<Vec<UnixStream>>> = Arc::new(Mutex::new(Vec::new()));
        let accepted = Arc::clone(&connections);
        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _)) => accepted.lock().push(stream),
                    Err(e) => {
                        tracing::warn!(error = %e, "guard server accept failed");
                        break;
                    }
                }
            }
        });

        Ok(GuardServer { name: name.to_string(), path, connections, accept_task })
    }

    /// The name children pass back via `--guard=<name>`. This is the
    /// socket path.
    pub fn guard_name(&self) -> String {
        self.path.display().to_string()
    }

    pub fn short_name(&self) -> &str {
        &self.name
    }

    pub fn is_listening(&self) -> bool {
        !self.accept_task.is_finished()
    }

    /// Number of currently held child connections.
    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }
}

impl Drop for GuardServer {
    fn drop(&mut self) {
        // Sockets before the listener.
        self.connections.lock().clear();
        self.accept_task.abort();
        let _ = std::fs::remove_file(&self.path);
    }
}
