// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command-line surface of the host binary.

use std::path::PathBuf;

use clap::Parser;

/// `iolinkd` — host runtime for stdio drivers and scheduled services.
#[derive(Debug, Parser)]
#[command(name = "iolinkd", version, disable_version_flag = true)]
pub struct ServerArgs {
    /// Data root directory
    #[arg(long = "data-root", default_value = ".")]
    pub data_root: PathBuf,

    /// HTTP port
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..))]
    pub port: Option<u16>,

    /// Listen address
    #[arg(long)]
    pub host: Option<String>,

    /// Log level
    #[arg(long = "log-level", value_parser = crate::config::LOG_LEVELS)]
    pub log_level: Option<String>,

    /// Directory with the static web UI
    #[arg(long = "webui-dir")]
    pub webui_dir: Option<PathBuf>,

    /// Print version
    #[arg(short = 'v', long = "version", action = clap::ArgAction::Version)]
    version: Option<bool>,
}
