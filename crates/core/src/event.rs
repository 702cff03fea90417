// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lifecycle events published on the server event bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A structured lifecycle event. Types are dotted names such as
/// `instance.started` or `schedule.suppressed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: Value,
    #[serde(rename = "ts")]
    pub timestamp: DateTime<Utc>,
}

impl ServerEvent {
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        ServerEvent { event_type: event_type.into(), data, timestamp: Utc::now() }
    }

    /// Prefix match used by SSE subscription filters and log queries.
    pub fn matches_prefix(&self, prefix: &str) -> bool {
        self.event_type.starts_with(prefix)
    }
}
