// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Parent/child lifetime guard.
//!
//! Two independent mechanisms ensure a child dies with its parent:
//!
//! - OS-level containment: the kernel delivers SIGKILL to the child when
//!   the parent disappears (Linux parent-death signal; no-op elsewhere).
//! - IPC watchdog: the parent holds a local socket server and passes its
//!   name via `--guard=<name>`; the child self-terminates when the
//!   connection drops.
//!
//! Each covers the other's failure mode: the OS layer is unavailable on
//! some platforms, the IPC layer fails if the child never connects.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod client;
mod server;
mod tree;

pub use client::GuardClient;
pub use server::GuardServer;
pub use tree::prepare_command;

/// Argument prefix the child looks for on its command line.
pub const GUARD_ARG_PREFIX: &str = "--guard=";
