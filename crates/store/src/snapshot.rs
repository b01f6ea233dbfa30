// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Point-in-time snapshots of the document map, and the schema-version
//! migration registry used to bring an on-disk snapshot up to the
//! in-memory representation the running binary expects.
//!
//! A snapshot is taken after compacting the WAL (see `Wal::truncate_before`)
//! so recovery only has to replay a short tail. Its `v` field records the
//! schema version it was written with; opening an older snapshot runs it
//! through every registered [`Migration`] on the path to the current
//! version before the store trusts its contents.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::doc::{DocKey, Revision};

/// The schema version this binary writes and expects to read after
/// migration. Bump when `Snapshot`'s or a document's on-disk shape changes.
pub const CURRENT_SCHEMA_VERSION: u32 = 1;

/// On-disk representation of the document map at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub v: u32,
    /// The WAL sequence number this snapshot reflects; recovery replays
    /// only entries after this.
    pub seq: u64,
    pub state: BTreeMap<DocKey, (Value, Revision)>,
}

impl Snapshot {
    pub fn new(seq: u64, state: BTreeMap<DocKey, (Value, Revision)>) -> Self {
        Self { v: CURRENT_SCHEMA_VERSION, seq, state }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MigrationError {
    #[error("snapshot schema version {0} is newer than this binary's {1}")]
    TooNew(u32, u32),
    #[error("no migration path from schema version {0} to {1}")]
    NoPath(u32, u32),
}

/// A single schema-version step, applied in place to the raw JSON value.
pub trait Migration: Send + Sync {
    fn source_version(&self) -> u32;
    fn target_version(&self) -> u32;
    fn migrate(&self, snapshot: &mut Value) -> Result<(), MigrationError>;
}

/// Ordered set of migrations used to walk an old snapshot up to
/// [`CURRENT_SCHEMA_VERSION`].
pub struct MigrationRegistry {
    pub(crate) migrations: Vec<Box<dyn Migration>>,
}

impl MigrationRegistry {
    pub fn new() -> Self {
        Self { migrations: Vec::new() }
    }

    pub fn register(&mut self, migration: Box<dyn Migration>) {
        self.migrations.push(migration);
    }

    /// Apply whatever chain of registered migrations takes `snapshot` from
    /// its current `v` to `target`. A no-op if they already match.
    pub fn migrate_to(&self, mut snapshot: Value, target: u32) -> Result<Value, MigrationError> {
        let mut current = snapshot["v"].as_u64().unwrap_or(1) as u32;
        if current == target {
            return Ok(snapshot);
        }
        if current > target {
            return Err(MigrationError::TooNew(current, target));
        }
        while current != target {
            let step = self
                .migrations
                .iter()
                .find(|m| m.source_version() == current)
                .ok_or(MigrationError::NoPath(current, target))?;
            step.migrate(&mut snapshot)?;
            current = step.target_version();
            snapshot["v"] = Value::from(current);
        }
        Ok(snapshot)
    }
}

impl Default for MigrationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "migration_tests.rs"]
mod tests;
