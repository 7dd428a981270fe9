// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! funcd - function call server over stdin/stdout.
//!
//! Reads the line protocol from stdin and writes terminal responses to
//! stdout. Logs go to stderr.

use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use funcd_core::input::stdin_lines;
use funcd_core::{FunctionManager, FunctionRegistry, ManagerConfig, ResultWriter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing; stdout carries the protocol
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "funcd=info,funcd_core=info".into()),
        )
        .init();

    // Load .env file if present
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            warn!(error = %e, "Failed to load .env file");
        }
    }

    let config = ManagerConfig::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        workers = config.worker_count,
        queue_size = config.queue_size,
        cancel_fallback_ms = config.cancel_fallback_delay.as_millis() as u64,
        drain_timeout_ms = config.shutdown_drain_timeout.as_millis() as u64,
        "Configuration loaded"
    );

    let registry = Arc::new(FunctionRegistry::new());
    let manager = FunctionManager::builder()
        .registry(registry)
        .writer(ResultWriter::stdout())
        .config(config)
        .build()?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl-C");
                signal_token.cancel();
            }
            Err(e) => error!(error = %e, "Failed to listen for Ctrl-C"),
        }
    });

    manager.run(stdin_lines(), shutdown).await?;

    let stats = manager.stats();
    info!(stats = %serde_json::to_string(&stats)?, "Final function stats");

    // After QUIT or Ctrl-C the blocking stdin reader may still be parked on a
    // read, which would keep the runtime from shutting down.
    std::process::exit(0)
}
