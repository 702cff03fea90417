// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Frame codec: request/response line encoding and parsing.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Wire code for a malformed header or non-JSON line on driver stdout.
pub const CODE_INVALID_FRAME: i32 = 1000;

/// Wire code synthesized when the driver exits without a terminal response.
pub const CODE_DRIVER_EXITED: i32 = 1001;

/// Response status carried in a frame header.
///
/// `done` and `error` are terminal; `event` is intermediate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Event,
    Done,
    Error,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Done | Status::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Event => "event",
            Status::Done => "done",
            Status::Error => "error",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        match s {
            "event" => Some(Status::Event),
            "done" => Some(Status::Done),
            "error" => Some(Status::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request from the host to a driver: one line on stdin.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub cmd: String,
    /// Absent `data` is distinct from `data: null`.
    pub data: Option<Value>,
}

/// First line of a response frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub status: Status,
    pub code: i32,
}

/// A fully decoded response message (header + payload) on the host side.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub status: Status,
    pub code: i32,
    pub payload: Value,
}

impl Message {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Errors produced while decoding wire frames.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Serialize one request line, including the trailing newline.
pub fn serialize_request(cmd: &str, data: Option<&Value>) -> Result<Vec<u8>, FrameError> {
    let mut obj = Map::new();
    obj.insert("cmd".to_string(), Value::String(cmd.to_string()));
    if let Some(data) = data {
        obj.insert("data".to_string(), data.clone());
    }
    let mut line = serde_json::to_vec(&Value::Object(obj))?;
    line.push(b'\n');
    Ok(line)
}

/// Serialize a response frame: header line followed by a payload line.
///
/// Object and array payloads are emitted as-is; scalars become a bare JSON
/// scalar line. Compact encoding means embedded newlines are impossible
/// (strings escape `\n`).
pub fn serialize_response(status: Status, code: i32, payload: &Value) -> Result<Vec<u8>, FrameError> {
    let mut header = Map::new();
    header.insert("status".to_string(), Value::String(status.as_str().to_string()));
    header.insert("code".to_string(), Value::from(code));

    let mut out = serde_json::to_vec(&Value::Object(header))?;
    out.push(b'\n');
    out.extend_from_slice(&serde_json::to_vec(payload)?);
    out.push(b'\n');
    Ok(out)
}

/// Parse a request line. Fails unless the line is a JSON object with a
/// string `cmd` field.
pub fn parse_request(line: &[u8]) -> Result<Request, FrameError> {
    let value: Value = serde_json::from_slice(line)
        .map_err(|e| FrameError::InvalidFrame(format!("request is not valid JSON: {e}")))?;
    let obj = value
        .as_object()
        .ok_or_else(|| FrameError::InvalidFrame("request must be a JSON object".to_string()))?;

    let cmd = match obj.get("cmd") {
        Some(Value::String(s)) => s.clone(),
        _ => {
            return Err(FrameError::InvalidFrame(
                "request is missing string field 'cmd'".to_string(),
            ))
        }
    };

    Ok(Request { cmd, data: obj.get("data").cloned() })
}

/// Parse a header line. `status` must be one of the three known values and
/// `code` must be present.
pub fn parse_header(line: &[u8]) -> Result<FrameHeader, FrameError> {
    let value: Value = serde_json::from_slice(line)
        .map_err(|e| FrameError::InvalidFrame(format!("header is not valid JSON: {e}")))?;
    let obj = value
        .as_object()
        .ok_or_else(|| FrameError::InvalidFrame("header must be a JSON object".to_string()))?;

    let status = obj
        .get("status")
        .and_then(Value::as_str)
        .and_then(Status::from_str)
        .ok_or_else(|| FrameError::InvalidFrame("header has no valid 'status'".to_string()))?;

    let code = obj
        .get("code")
        .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
        .ok_or_else(|| FrameError::InvalidFrame("header has no integer 'code'".to_string()))?;

    Ok(FrameHeader { status, code: code as i32 })
}

/// Parse a payload line as any JSON value. Unparseable bytes fall back to
/// the raw UTF-8 string so driver output is never lost.
pub fn parse_payload(line: &[u8]) -> Value {
    match serde_json::from_slice(line) {
        Ok(value) => value,
        Err(_) => Value::String(String::from_utf8_lossy(line).trim().to_string()),
    }
}

#[cfg(test)]
#[path = "frame_tests.rs"]
mod tests;
