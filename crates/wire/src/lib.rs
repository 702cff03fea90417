// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSONL wire protocol between the host and driver processes.
//!
//! Requests are a single compact JSON line. Responses are two consecutive
//! lines: a header (`{"status":...,"code":...}`) followed by a payload line
//! holding any JSON value.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod frame;
mod framer;

pub use frame::{
    parse_header, parse_payload, parse_request, serialize_request, serialize_response, FrameError,
    FrameHeader, Message, Request, Status, CODE_DRIVER_EXITED, CODE_INVALID_FRAME,
};
pub use framer::LineFramer;
