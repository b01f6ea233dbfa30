// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("could not determine a state directory")]
    NoStateDir,

    #[error("failed to parse config: {0}")]
    Config(String),

    #[error("failed to acquire lock: another server instance already running?")]
    LockFailed(#[source] std::io::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store error: {0}")]
    Store(#[from] mse_core::Error),
}
