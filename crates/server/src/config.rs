// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Server configuration: strict `config.json` plus CLI overrides.

use std::path::Path;

use serde_json::Value;
use thiserror::Error;

use crate::args::ServerArgs;

const KNOWN_FIELDS: [&str; 8] = [
    "port",
    "host",
    "logLevel",
    "serviceProgram",
    "corsOrigin",
    "webuiDir",
    "logMaxBytes",
    "logMaxFiles",
];

pub const LOG_LEVELS: [&str; 4] = ["debug", "info", "warn", "error"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ConfigError(pub String);

/// Effective server configuration. A missing `config.json` yields the
/// defaults; an unknown key rejects the whole file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub log_level: String,
    pub service_program: Option<String>,
    pub cors_origin: Option<String>,
    pub webui_dir: Option<String>,
    pub log_max_bytes: u64,
    pub log_max_files: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: 8080,
            host: "127.0.0.1".to_string(),
            log_level: "info".to_string(),
            service_program: None,
            cors_origin: None,
            webui_dir: None,
            log_max_bytes: 1024 * 1024,
            log_max_files: 5,
        }
    }
}

impl ServerConfig {
    pub fn load_from_file(path: &Path) -> Result<ServerConfig, ConfigError> {
        let mut cfg = ServerConfig::default();
        if !path.exists() {
            return Ok(cfg);
        }

        let bytes = std::fs::read(path)
            .map_err(|_| ConfigError(format!("cannot open config file: {}", path.display())))?;
        let value: Value = serde_json::from_slice(&bytes)
            .map_err(|e| ConfigError(format!("config.json parse error: {e}")))?;
        let obj = value
            .as_object()
            .ok_or_else(|| ConfigError("config.json must contain a JSON object".to_string()))?;

        for key in obj.keys() {
            if !KNOWN_FIELDS.contains(&key.as_str()) {
                return Err(ConfigError(format!("unknown field in config.json: {key}")));
            }
        }

        if let Some(port) = obj.get("port") {
            let port = port
                .as_i64()
                .ok_or_else(|| ConfigError("config field 'port' must be an integer".to_string()))?;
            if !(1..=65535).contains(&port) {
                return Err(ConfigError("config field 'port' out of range".to_string()));
            }
            cfg.port = port as u16;
        }

        if let Some(host) = obj.get("host") {
            let host = host
                .as_str()
                .ok_or_else(|| ConfigError("config field 'host' must be a string".to_string()))?;
            if host.is_empty() {
                return Err(ConfigError("config field 'host' cannot be empty".to_string()));
            }
            cfg.host = host.to_string();
        }

        if let Some(level) = obj.get("logLevel") {
            let level = level.as_str().ok_or_else(|| {
                ConfigError("config field 'logLevel' must be a string".to_string())
            })?;
            if !LOG_LEVELS.contains(&level) {
                return Err(ConfigError(format!("invalid config logLevel: {level}")));
            }
            cfg.log_level = level.to_string();
        }

        if let Some(program) = obj.get("serviceProgram") {
            let program = program.as_str().ok_or_else(|| {
                ConfigError("config field 'serviceProgram' must be a string".to_string())
            })?;
            cfg.service_program = Some(program.to_string());
        }

        if let Some(origin) = obj.get("corsOrigin") {
            let origin = origin.as_str().ok_or_else(|| {
                ConfigError("config field 'corsOrigin' must be a string".to_string())
            })?;
            if origin.is_empty() {
                return Err(ConfigError("config field 'corsOrigin' cannot be empty".to_string()));
            }
            cfg.cors_origin = Some(origin.to_string());
        }

        if let Some(dir) = obj.get("webuiDir") {
            let dir = dir.as_str().ok_or_else(|| {
                ConfigError("config field 'webuiDir' must be a string".to_string())
            })?;
            cfg.webui_dir = Some(dir.to_string());
        }

        if let Some(max_bytes) = obj.get("logMaxBytes") {
            let max_bytes = max_bytes.as_i64().ok_or_else(|| {
                ConfigError("config field 'logMaxBytes' must be an integer".to_string())
            })?;
            if max_bytes < 1024 {
                return Err(ConfigError("config field 'logMaxBytes' must be >= 1024".to_string()));
            }
            cfg.log_max_bytes = max_bytes as u64;
        }

        if let Some(max_files) = obj.get("logMaxFiles") {
            let max_files = max_files.as_i64().ok_or_else(|| {
                ConfigError("config field 'logMaxFiles' must be an integer".to_string())
            })?;
            if !(1..=100).contains(&max_files) {
                return Err(ConfigError(
                    "config field 'logMaxFiles' must be in [1,100]".to_string(),
                ));
            }
            cfg.log_max_files = max_files as usize;
        }

        Ok(cfg)
    }

    /// Command-line values override the file.
    pub fn apply_args(&mut self, args: &ServerArgs) {
        if let Some(port) = args.port {
            self.port = port;
        }
        if let Some(host) = &args.host {
            self.host = host.clone();
        }
        if let Some(level) = &args.log_level {
            self.log_level = level.clone();
        }
        if let Some(dir) = &args.webui_dir {
            self.webui_dir = Some(dir.display().to_string());
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
