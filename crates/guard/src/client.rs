// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Guard client: the child-side watchdog.
//!
//! Runs on a dedicated plain thread so it keeps working even when the
//! child's own runtime is wedged. Connection loss triggers a fast exit
//! that bypasses atexit handlers and destructors — running cleanup while
//! the parent is gone is how shutdown deadlocks happen.

use std::io::Read;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::GUARD_ARG_PREFIX;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Watches the parent's guard socket and terminates the process when the
/// connection is lost.
pub struct GuardClient {
    stopped: Arc<AtomicBool>,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl GuardClient {
    /// Scan argv for `--guard=<name>` and start a client when present.
    pub fn from_args<I, S>(args: I) -> Option<GuardClient>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let name = args
            .into_iter()
            .find_map(|a| a.as_ref().strip_prefix(GUARD_ARG_PREFIX).map(str::to_string))?;
        Some(GuardClient::start(&name))
    }

    /// Connect to the named guard server and begin watching.
    pub fn start(guard_name: &str) -> GuardClient {
        let stopped = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stopped);
        let name = guard_name.to_string();

        let worker = std::thread::spawn(move || watch(&name, &flag));
        GuardClient { stopped, worker: Some(worker) }
    }

    /// Graceful shutdown: suppress the self-kill path, then wait for the
    /// worker to notice (one poll cycle at most).
    pub fn stop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for GuardClient {
    fn drop(&mut self) {
        self.stop();
    }
}

fn watch(guard_name: &str, stopped: &AtomicBool) {
    let Some(mut socket) = connect_within(guard_name, CONNECT_TIMEOUT, stopped) else {
        if !stopped.load(Ordering::SeqCst) {
            force_fast_exit(1);
        }
        return;
    };

    let _ = socket.set_read_timeout(Some(POLL_INTERVAL));
    let mut scratch = [0u8; 64];
    loop {
        if stopped.load(Ordering::SeqCst) {
            let _ = socket.shutdown(std::net::Shutdown::Both);
            return;
        }
        match socket.read(&mut scratch) {
            // The server never writes; 0 means the connection dropped.
            Ok(0) => break,
            Ok(_) => continue,
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue
            }
            Err(_) => break,
        }
    }

    if !stopped.load(Ordering::SeqCst) {
        force_fast_exit(1);
    }
}

fn connect_within(name: &str, timeout: Duration, stopped: &AtomicBool) -> Option<UnixStream> {
    let deadline = Instant::now() + timeout;
    loop {
        if stopped.load(Ordering::SeqCst) {
            return None;
        }
        match UnixStream::connect(name) {
            Ok(socket) => return Some(socket),
            Err(_) if Instant::now() < deadline => {
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(_) => return None,
        }
    }
}

/// Terminate immediately, skipping atexit handlers and destructors.
fn force_fast_exit(code: i32) -> ! {
    unsafe { nix::libc::_exit(code) }
}
