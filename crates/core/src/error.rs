// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The closed error taxonomy every public operation surfaces through.
//!
//! Callers distinguish on the variant, never on message text.
//! Transaction-level `Aborted` is never surfaced here: the transaction
//! runner retries it internally and only reports `ExcessiveContention`
//! once its retry budget is exhausted.

use thiserror::Error;

/// Error kinds a public operation on the model state engine can return.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("not valid: {0}")]
    NotValid(String),

    #[error("not alive: {0}")]
    NotAlive(String),

    #[error("not provisioned: {0}")]
    NotProvisioned(String),

    #[error("has persistent storage: {0}")]
    HasPersistentStorage(String),

    #[error("has hosted models: {0}")]
    HasHostedModels(String),

    #[error("no available manager: {0}")]
    NoAvailableManager(String),

    #[error("excessive contention: {0}")]
    ExcessiveContention(String),

    #[error("store closed")]
    StoreClosed,

    #[error("cancelled")]
    Cancelled,
}

impl Error {
    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }

    pub fn not_alive(what: impl Into<String>) -> Self {
        Error::NotAlive(what.into())
    }

    /// Idempotent destruction paths absorb `NotAlive`/`NotFound` on
    /// re-entry: the entity already reached or passed the requested
    /// state, so the caller should treat this as success.
    pub fn is_idempotent_on_retry(&self) -> bool {
        matches!(self, Error::NotAlive(_) | Error::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
