// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! C1: the document store adapter. Owns the in-memory document map, the
//! WAL that makes it durable, and the change-feed broadcast that watchers
//! subscribe to.

use std::collections::BTreeMap;
use std::path::Path;
#[cfg(test)]
use std::path::PathBuf;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;

use mse_core::{Clock, Error, Result};

use crate::doc::{Assert, ChangeFeedEntry, DocKey, Op, OpKind, Revision, DELETED_REVISION};
use crate::snapshot::{MigrationRegistry, Snapshot, CURRENT_SCHEMA_VERSION};
use crate::wal::{replay_all, Wal, WalEntry};

/// Depth of the change-feed broadcast channel. Slow subscribers that fall
/// this far behind see `RecvError::Lagged` and must resync by re-reading
/// the collections they care about.
const CHANGE_FEED_CAPACITY: usize = 4096;

struct Inner {
    docs: BTreeMap<DocKey, (Value, Revision)>,
    wal: Wal,
}

/// The document store. Cheaply `Clone`-able; clones share the same
/// underlying state.
#[derive(Clone)]
pub struct Store {
    inner: std::sync::Arc<Mutex<Inner>>,
    changes: broadcast::Sender<ChangeFeedEntry>,
}

impl Store {
    /// Open (or create) a store rooted at `dir`, replaying its WAL and any
    /// snapshot to rebuild the document map.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|e| Error::NotValid(e.to_string()))?;

        let snapshot_path = dir.join("snapshot.json");
        let wal_path = dir.join("wal.log");

        let (mut docs, processed_seq) = if snapshot_path.exists() {
            let compressed = std::fs::read(&snapshot_path).map_err(|e| Error::NotValid(e.to_string()))?;
            let raw = zstd::stream::decode_all(compressed.as_slice()).map_err(|e| Error::NotValid(e.to_string()))?;
            let value: Value = serde_json::from_slice(&raw).map_err(|e| Error::NotValid(e.to_string()))?;
            let registry = MigrationRegistry::new();
            let migrated = registry
                .migrate_to(value, CURRENT_SCHEMA_VERSION)
                .map_err(|e| Error::NotValid(e.to_string()))?;
            let snapshot: Snapshot =
                serde_json::from_value(migrated).map_err(|e| Error::NotValid(e.to_string()))?;
            (snapshot.state, snapshot.seq)
        } else {
            (BTreeMap::new(), 0)
        };

        let entries = replay_all(&wal_path).map_err(|e| Error::NotValid(e.to_string()))?;
        for entry in entries.into_iter().filter(|e| e.seq > processed_seq) {
            apply_entry(&mut docs, &entry);
        }

        let wal = Wal::open(&wal_path, processed_seq).map_err(|e| Error::NotValid(e.to_string()))?;
        let (changes, _) = broadcast::channel(CHANGE_FEED_CAPACITY);

        tracing::info!(path = %dir.display(), docs = docs.len(), "document store opened");

        Ok(Self { inner: std::sync::Arc::new(Mutex::new(Inner { docs, wal })), changes })
    }

    /// Subscribe to the change feed. New subscribers only see changes
    /// committed after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeFeedEntry> {
        self.changes.subscribe()
    }

    pub fn get(&self, key: &DocKey) -> Option<(Value, Revision)> {
        self.inner.lock().docs.get(key).cloned()
    }

    /// All documents in `collection` that also match `model` (when the
    /// collection is model-scoped). Used by entity code to enumerate, e.g.,
    /// all units of an application.
    pub fn find(&self, collection: mse_core::Collection) -> Vec<(DocKey, Value, Revision)> {
        self.inner
            .lock()
            .docs
            .iter()
            .filter(|(k, _)| k.collection() == collection)
            .map(|(k, (v, r))| (k.clone(), v.clone(), *r))
            .collect()
    }

    /// Commit `ops` atomically: every assertion must hold against the
    /// current state, or the whole batch is rejected with no side effects.
    pub fn commit(&self, ops: Vec<Op>, clock: &impl Clock) -> Result<Vec<ChangeFeedEntry>> {
        if ops.is_empty() {
            return Ok(Vec::new());
        }
        let mut inner = self.inner.lock();

        for op in &ops {
            check_assert(&inner.docs, op)?;
        }

        let seq = inner
            .wal
            .append(&ops, clock.epoch_ms())
            .map_err(|e| Error::NotValid(e.to_string()))?;
        if inner.wal.needs_flush() {
            inner.wal.flush().map_err(|e| Error::NotValid(e.to_string()))?;
        }

        let mut feed_entries = Vec::with_capacity(ops.len());
        for op in &ops {
            let revno = apply_op(&mut inner.docs, op, seq as Revision);
            feed_entries.push(ChangeFeedEntry {
                collection: op.key.collection(),
                id: op.key.wire_id(),
                revno,
            });
        }

        for entry in &feed_entries {
            // No subscribers is not an error; it just means nobody's watching yet.
            let _ = self.changes.send(entry.clone());
        }

        Ok(feed_entries)
    }

    pub fn flush(&self) -> Result<()> {
        self.inner.lock().wal.flush().map_err(|e| Error::NotValid(e.to_string()))
    }

    /// Write a fresh snapshot and compact the WAL down to entries after it,
    /// shrinking recovery time. Safe to call at any point; idempotent.
    pub fn checkpoint(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        let mut inner = self.inner.lock();
        inner.wal.flush().map_err(|e| Error::NotValid(e.to_string()))?;
        let seq = inner.wal.write_seq();
        let snapshot = Snapshot::new(seq, inner.docs.clone());
        let tmp = dir.join("snapshot.json.tmp");
        let final_path = dir.join("snapshot.json");
        let raw = serde_json::to_vec(&snapshot).map_err(|e| Error::NotValid(e.to_string()))?;
        let compressed = zstd::stream::encode_all(raw.as_slice(), 0).map_err(|e| Error::NotValid(e.to_string()))?;
        std::fs::write(&tmp, compressed).map_err(|e| Error::NotValid(e.to_string()))?;
        std::fs::rename(&tmp, &final_path).map_err(|e| Error::NotValid(e.to_string()))?;
        inner
            .wal
            .truncate_before(seq + 1)
            .map_err(|e| Error::NotValid(e.to_string()))?;
        tracing::info!(path = %final_path.display(), seq, "checkpoint written");
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn wal_path(&self) -> PathBuf {
        self.inner.lock().wal.path().to_path_buf()
    }
}

fn check_assert(docs: &BTreeMap<DocKey, (Value, Revision)>, op: &Op) -> Result<()> {
    let existing = docs.get(&op.key);
    match &op.assert {
        Assert::Always => Ok(()),
        Assert::DocMissing => {
            if existing.is_some() {
                Err(Error::AlreadyExists(op.key.to_string()))
            } else {
                Ok(())
            }
        }
        Assert::DocExists => {
            if existing.is_none() {
                Err(Error::NotFound(op.key.to_string()))
            } else {
                Ok(())
            }
        }
        Assert::LifeEquals(expected) => {
            let life = existing
                .and_then(|(v, _)| v.get("life"))
                .and_then(|v| serde_json::from_value::<mse_core::Life>(v.clone()).ok())
                .unwrap_or_default();
            if life == *expected {
                Ok(())
            } else {
                Err(Error::NotAlive(op.key.to_string()))
            }
        }
        Assert::FieldEquals { field, value } => {
            let current = existing.and_then(|(v, _)| v.get(field.as_str()));
            if current == Some(value) {
                Ok(())
            } else {
                Err(Error::ExcessiveContention(format!("{}: {field} mismatch", op.key)))
            }
        }
        Assert::FieldGreaterThanZero { field } => {
            let current = existing
                .and_then(|(v, _)| v.get(field.as_str()))
                .and_then(|v| v.as_i64())
                .unwrap_or(0);
            if current > 0 {
                Ok(())
            } else {
                Err(Error::ExcessiveContention(format!("{}: {field} is not positive", op.key)))
            }
        }
    }
}

fn apply_op(docs: &mut BTreeMap<DocKey, (Value, Revision)>, op: &Op, seq: Revision) -> Revision {
    match &op.kind {
        OpKind::Insert(doc) | OpKind::Update(doc) => {
            docs.insert(op.key.clone(), (doc.clone(), seq));
            seq
        }
        OpKind::Remove => {
            docs.remove(&op.key);
            DELETED_REVISION
        }
    }
}

fn apply_entry(docs: &mut BTreeMap<DocKey, (Value, Revision)>, entry: &WalEntry) {
    for op in &entry.ops {
        apply_op(docs, op, entry.seq as Revision);
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
