// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `iolinkd`: the host runtime binary.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use iolink_server::app::build_app;
use iolink_server::{ServerArgs, ServerConfig, ServerManager};

const DATA_SUBDIRS: [&str; 5] = ["services", "projects", "workspaces", "logs", "drivers"];

#[tokio::main]
async fn main() -> ExitCode {
    // clap exits with 2 on usage errors, 0 on --help/--version.
    let args = ServerArgs::parse();
    let data_root = match std::path::absolute(&args.data_root) {
        Ok(path) => path,
        Err(e) => {
            eprintln!("Error: invalid data root: {e}");
            return ExitCode::from(2);
        }
    };

    let mut config = match ServerConfig::load_from_file(&data_root.join("config.json")) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::from(2);
        }
    };
    config.apply_args(&args);

    init_tracing(&config.log_level);

    for sub in DATA_SUBDIRS {
        if let Err(e) = std::fs::create_dir_all(data_root.join(sub)) {
            tracing::error!(dir = sub, error = %e, "failed to create data directory");
            return ExitCode::from(1);
        }
    }

    let manager = ServerManager::new(&data_root, config.clone());
    if let Err(e) = manager.initialize().await {
        tracing::error!(error = %e, "initialization failed");
        return ExitCode::from(1);
    }
    manager.start_scheduling().await;

    let app = build_app(Arc::clone(&manager));
    let bind_addr = format!("{}:{}", config.host, config.port);
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %bind_addr, error = %e, "failed to listen");
            return ExitCode::from(1);
        }
    };
    tracing::info!(addr = %bind_addr, data_root = %data_root.display(), "HTTP server listening");

    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    manager.shutdown().await;

    match serve_result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "server error");
            ExitCode::from(1)
        }
    }
}

fn init_tracing(log_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
