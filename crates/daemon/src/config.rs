// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Server configuration: a TOML file with environment-variable overrides
//! for the handful of settings that need to differ across deployments
//! without editing the file (state directory, cleanup cadence).

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ServerError;

/// Resolve the root state directory: `MSE_STATE_DIR` >
/// `XDG_STATE_HOME/mse` > `~/.local/state/mse`.
pub fn default_state_dir() -> Result<PathBuf, ServerError> {
    if let Ok(dir) = std::env::var("MSE_STATE_DIR") {
        return Ok(PathBuf::from(dir));
    }
    if let Some(xdg) = std::env::var_os("XDG_STATE_HOME") {
        return Ok(PathBuf::from(xdg).join("mse"));
    }
    let home = dirs::home_dir().ok_or(ServerError::NoStateDir)?;
    Ok(home.join(".local/state/mse"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Root directory for the document store's WAL and snapshots.
    pub state_dir: PathBuf,
    /// How often the cleanup scheduler sweeps every known model for
    /// pending cleanup documents.
    pub cleanup_interval_ms: u64,
    /// Maximum optimistic-retry attempts before a transaction surfaces
    /// `ExcessiveContention`. `None` keeps the runner's own default.
    pub max_txn_attempts: Option<u32>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { state_dir: PathBuf::from("."), cleanup_interval_ms: 2_000, max_txn_attempts: None }
    }
}

impl ServerConfig {
    /// Load from `path` if it exists, falling back to defaults with
    /// `state_dir` resolved from the environment. `MSE_STATE_DIR` always
    /// wins over whatever the file says, so an operator can relocate the
    /// store without editing a checked-in config.
    pub fn load(path: &std::path::Path) -> Result<Self, ServerError> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            toml::from_str(&raw).map_err(|e| ServerError::Config(e.to_string()))?
        } else {
            Self { state_dir: default_state_dir()?, ..Self::default() }
        };
        if let Ok(dir) = std::env::var("MSE_STATE_DIR") {
            config.state_dir = PathBuf::from(dir);
        }
        Ok(config)
    }

    pub fn store_dir(&self) -> PathBuf {
        self.state_dir.join("store")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.state_dir.join("server.pid")
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
