// ABOUTME: HTTP server binary: loads config, connects storage, serves the router
// ABOUTME: Configuration comes entirely from LEDGERGATE_* environment variables
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Ledgergate Contributors

use anyhow::{Context, Result};
use ledgergate::config::ServerConfig;
use ledgergate::database::Database;
use ledgergate::logging;
use ledgergate::routes::{router, AppState};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServerConfig::from_env().context("failed to load configuration")?;
    logging::init(&config.log_level);

    if !config.oauth_enabled {
        tracing::warn!("OAuth server is disabled by configuration, exiting");
        return Ok(());
    }

    let database = Database::new(&config.database_url)
        .await
        .context("failed to open database")?;

    let bind_addr = format!("{}:{}", config.host, config.http_port);
    tracing::info!(
        addr = %bind_addr,
        issuer = %config.issuer(),
        tenancy = config.tenancy_enabled,
        "starting ledgergate"
    );

    let state = Arc::new(AppState::new(database, config));
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server terminated")?;

    tracing::info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install shutdown handler");
        return;
    }
    tracing::info!("shutdown signal received");
}
