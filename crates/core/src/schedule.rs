// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Project schedules: manual, fixed-rate, or daemon.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

const DEFAULT_INTERVAL_MS: u64 = 5000;
const DEFAULT_MAX_CONCURRENT: u32 = 1;
const DEFAULT_RESTART_DELAY_MS: u64 = 3000;
const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// Policy describing when and how a project runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Schedule {
    /// Never auto-started; runs only on explicit request.
    Manual,
    /// Periodic tick; skipped ticks are never queued.
    FixedRate {
        #[serde(rename = "intervalMs")]
        interval_ms: u64,
        #[serde(rename = "maxConcurrent")]
        max_concurrent: u32,
    },
    /// Kept running; restarted with a delay, suppressed on crash loops.
    Daemon {
        #[serde(rename = "restartDelayMs")]
        restart_delay_ms: u64,
        #[serde(rename = "maxConsecutiveFailures")]
        max_consecutive_failures: u32,
    },
}

impl Default for Schedule {
    fn default() -> Self {
        Schedule::Manual
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ScheduleError(pub String);

fn json_int(obj: &serde_json::Map<String, Value>, key: &str, default: i64) -> i64 {
    match obj.get(key) {
        Some(v) => v
            .as_i64()
            .or_else(|| v.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
            .unwrap_or(default),
        None => default,
    }
}

impl Schedule {
    /// Parse a schedule object. A missing `type` means `manual`; numeric
    /// fields fall back to their defaults and are bounds-checked.
    pub fn from_json(value: &Value) -> Result<Self, ScheduleError> {
        let obj = value
            .as_object()
            .ok_or_else(|| ScheduleError("schedule must be an object".to_string()))?;

        let schedule_type = obj.get("type").and_then(Value::as_str).unwrap_or("manual");
        match schedule_type {
            "manual" => Ok(Schedule::Manual),
            "fixed_rate" => {
                let interval_ms = json_int(obj, "intervalMs", DEFAULT_INTERVAL_MS as i64);
                let max_concurrent = json_int(obj, "maxConcurrent", DEFAULT_MAX_CONCURRENT as i64);
                if interval_ms < 100 {
                    return Err(ScheduleError("schedule.intervalMs must be >= 100".to_string()));
                }
                if max_concurrent < 1 {
                    return Err(ScheduleError(
                        "schedule.maxConcurrent must be >= 1".to_string(),
                    ));
                }
                Ok(Schedule::FixedRate {
                    interval_ms: interval_ms as u64,
                    max_concurrent: max_concurrent as u32,
                })
            }
            "daemon" => {
                let restart_delay_ms =
                    json_int(obj, "restartDelayMs", DEFAULT_RESTART_DELAY_MS as i64);
                let max_consecutive_failures =
                    json_int(obj, "maxConsecutiveFailures", DEFAULT_MAX_CONSECUTIVE_FAILURES as i64);
                if restart_delay_ms < 0 {
                    return Err(ScheduleError(
                        "schedule.restartDelayMs must be >= 0".to_string(),
                    ));
                }
                if max_consecutive_failures < 1 {
                    return Err(ScheduleError(
                        "schedule.maxConsecutiveFailures must be >= 1".to_string(),
                    ));
                }
                Ok(Schedule::Daemon {
                    restart_delay_ms: restart_delay_ms as u64,
                    max_consecutive_failures: max_consecutive_failures as u32,
                })
            }
            other => Err(ScheduleError(format!("unknown schedule type: {other}"))),
        }
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Schedule::Manual => "manual",
            Schedule::FixedRate { .. } => "fixed_rate",
            Schedule::Daemon { .. } => "daemon",
        }
    }
}

#[cfg(test)]
#[path = "schedule_tests.rs"]
mod tests;
