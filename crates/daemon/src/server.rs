// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process wiring: opens the document store (which replays its own WAL
//! and snapshot), runs one reconciliation pass over every model so a
//! crash mid-cascade doesn't leave cleanups stranded, and then owns the
//! single clock and store handle for the life of the process.

use std::fs::File;
use std::io::Write;

use fs2::FileExt;
use mse_core::{Collection, ModelUuid, SystemClock};
use mse_store::Store;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::ServerError;

pub struct Server {
    pub config: ServerConfig,
    pub store: Store,
    pub clock: SystemClock,
    // Held for its exclusive lock; released on drop.
    #[allow(dead_code)]
    lock_file: File,
}

impl Server {
    /// Acquire the instance lock, open the store, and run startup
    /// reconciliation. Fails fast if another server already holds the
    /// lock for this state directory.
    pub fn start(config: ServerConfig) -> Result<Self, ServerError> {
        std::fs::create_dir_all(&config.state_dir)?;

        let lock_file = std::fs::OpenOptions::new().write(true).create(true).truncate(false).open(config.lock_path())?;
        lock_file.try_lock_exclusive().map_err(ServerError::LockFailed)?;
        let mut lock_file = lock_file;
        lock_file.set_len(0)?;
        writeln!(lock_file, "{}", std::process::id())?;

        let store = Store::open(config.store_dir())?;
        let clock = SystemClock;

        let server = Self { config, store, clock, lock_file };
        server.reconcile_all_models()?;
        Ok(server)
    }

    /// One pass of every model-level quiescence check plus a
    /// `RunCleanups()` sweep, so a model left `Dying` with queued
    /// cleanups by a prior crash keeps making progress immediately
    /// rather than waiting for the next scheduler tick.
    pub fn reconcile_all_models(&self) -> Result<(), ServerError> {
        let model_uuids: Vec<ModelUuid> = self
            .store
            .find(Collection::Models)
            .into_iter()
            .filter_map(|(_, raw, _)| serde_json::from_value::<mse_engine::model::Model>(raw).ok())
            .map(|m| m.uuid)
            .collect();

        info!(models = model_uuids.len(), "running startup reconciliation");
        for uuid in &model_uuids {
            if let Err(e) = self.reconcile_one_model(uuid) {
                warn!(model = %uuid, error = %e, "startup reconciliation failed for model");
            }
        }
        Ok(())
    }

    fn reconcile_one_model(&self, uuid: &ModelUuid) -> Result<(), ServerError> {
        let ops = mse_engine::model::maybe_advance_to_dead(&self.store, uuid)?;
        if !ops.is_empty() {
            self.store.commit(ops, &self.clock)?;
        }
        while mse_engine::needs_cleanup(&self.store, uuid) {
            let processed = mse_engine::run_cleanups_with_max_attempts(&self.store, &self.clock, uuid, self.config.max_txn_attempts)?;
            if processed == 0 {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
