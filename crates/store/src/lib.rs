// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! mse-store: the document store adapter (C1) and transaction runner
//! (C2). A file-backed, single-process store of JSON documents keyed by
//! `(collection, id)`, with optimistic multi-document transactions and a
//! change feed that the watcher runtime subscribes to.

pub mod doc;
pub mod snapshot;
pub mod store;
pub mod txn;
pub mod wal;

pub use doc::{Assert, ChangeFeedEntry, DocKey, Op, OpKind, Revision, DELETED_REVISION};
pub use snapshot::{Migration, MigrationError, MigrationRegistry, Snapshot, CURRENT_SCHEMA_VERSION};
pub use store::Store;
pub use txn::{Runner, TxnOutcome, DEFAULT_MAX_ATTEMPTS};
pub use wal::{Wal, WalEntry, WalError};
