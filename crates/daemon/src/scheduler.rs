// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The cleanup scheduler: a single periodic task sweeping every known
//! model for pending cleanup documents, so cleanups enqueued by one
//! caller's transaction get drained even if no other caller happens to
//! touch that model again.
//!
//! `RunCleanups()` is defined to be safe to call whenever, and this
//! module is the one place that calls it unprompted; per-model
//! invocations triggered by a request handler would compose with this
//! the same way, serialized by the store's own commit path.

use mse_core::{Collection, ModelUuid};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::server::Server;

/// Runs until `cancel` fires, sweeping all models every `interval`.
pub async fn run(server: std::sync::Arc<Server>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(server.config.cleanup_interval());
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("cleanup scheduler stopping");
                return;
            }
            _ = ticker.tick() => sweep_once(&server),
        }
    }
}

fn sweep_once(server: &Server) {
    let model_uuids: Vec<ModelUuid> = server
        .store
        .find(Collection::Models)
        .into_iter()
        .filter_map(|(_, raw, _)| serde_json::from_value::<mse_engine::model::Model>(raw).ok())
        .map(|m| m.uuid)
        .collect();

    for uuid in &model_uuids {
        if !mse_engine::needs_cleanup(&server.store, uuid) {
            continue;
        }
        match mse_engine::run_cleanups_with_max_attempts(&server.store, &server.clock, uuid, server.config.max_txn_attempts) {
            Ok(processed) if processed > 0 => info!(model = %uuid, processed, "drained pending cleanups"),
            Ok(_) => {}
            Err(e) => error!(model = %uuid, error = %e, "cleanup sweep failed"),
        }
    }
}

#[cfg(test)]
#[path = "scheduler_tests.rs"]
mod tests;
