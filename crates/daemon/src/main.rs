// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::sync::Arc;

use mse_server::{Server, ServerConfig, ServerError};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let config_path = std::env::var("MSE_CONFIG").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("mse-server.toml"));
    let config = ServerConfig::load(&config_path)?;

    let server = Arc::new(Server::start(config)?);
    tracing::info!(state_dir = %server.config.state_dir.display(), "mse-server ready");

    let cancel = CancellationToken::new();
    let scheduler = tokio::spawn(mse_server::scheduler::run(server.clone(), cancel.clone()));

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    cancel.cancel();
    let _ = scheduler.await;

    Ok(())
}
