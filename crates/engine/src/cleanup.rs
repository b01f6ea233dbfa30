// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! C5: the deferred destruction work queue.
//!
//! A cleanup doc is appended in the same transaction as the primary
//! effect that requires follow-up work. [`run_cleanups`] drains whatever
//! is pending *at the moment it is called* — anything a handler enqueues
//! while running is picked up by the next call, never the current one,
//! which is what gives the multi-pass "first pass marks Dying, second
//! pass removes" behavior callers rely on.

use mse_core::{Collection, ModelUuid, Result};
use mse_store::doc::{Assert, DocKey, Op};
use mse_store::{Runner, Store};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The closed set of deferred destruction steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CleanupKind {
    UnitsForDyingApplication,
    MachinesForDyingModel,
    ApplicationsForDyingModel,
    StorageForDyingUnit,
    StorageForDestroyedStorage,
    AttachmentsForDyingVolume,
    AttachmentsForDyingFilesystem,
    ForceDestroyedMachine,
    ActionsForDyingUnit,
    SettingsForRemovedRelation,
    HostedModelsForDyingController,
    ResourceBlob,
}

/// A pending unit of deferred work, as persisted in `cleanups`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupDoc {
    pub kind: CleanupKind,
    /// The entity the cleanup targets, e.g. an application name or machine id.
    pub target: String,
    #[serde(default)]
    pub args: Value,
}

/// Build the insert op for scheduling `kind` against `target`, to be
/// folded into the same transaction as the primary effect that requires
/// it. The local id is random: cleanup docs are processed by scanning
/// the collection, not addressed individually.
pub fn schedule(model: ModelUuid, kind: CleanupKind, target: impl Into<String>, args: Value) -> Op {
    let local = nanoid::nanoid!(12);
    let key = DocKey::scoped(model, Collection::Cleanups, local).expect("cleanups is model-scoped");
    let doc = CleanupDoc { kind, target: target.into(), args };
    Op::insert(key, serde_json::to_value(doc).expect("CleanupDoc always serializes"))
}

/// `true` if any cleanup is pending for `model`.
pub fn needs_cleanup(store: &Store, model: &ModelUuid) -> bool {
    store
        .find(Collection::Cleanups)
        .iter()
        .any(|(key, ..)| key.model() == Some(model))
}

/// Drain whatever cleanup docs are pending for `model` right now, one
/// handler dispatch and removal per doc, in the order they were created
/// (the store's revision number, which is monotonic, stands in for
/// insertion order).
///
/// Returns the number of cleanup docs processed. A handler's own errors
/// are logged and do not stop the drain of the remaining docs — a
/// handler failing is never supposed to wedge the whole queue.
pub fn run_cleanups(store: &Store, clock: &impl mse_core::Clock, model: &ModelUuid) -> Result<usize> {
    run_cleanups_with_max_attempts(store, clock, model, None)
}

/// Like [`run_cleanups`] but overriding the transaction runner's retry
/// budget for every cleanup handler's commit, e.g. from a deployment's
/// own configuration rather than the runner's built-in default.
pub fn run_cleanups_with_max_attempts(
    store: &Store,
    clock: &impl mse_core::Clock,
    model: &ModelUuid,
    max_attempts: Option<u32>,
) -> Result<usize> {
    let mut pending: Vec<_> = store
        .find(Collection::Cleanups)
        .into_iter()
        .filter(|(key, ..)| key.model() == Some(model))
        .collect();
    pending.sort_by_key(|(_, _, rev)| *rev);

    let mut processed = 0;
    for (key, raw, _) in pending {
        let doc: CleanupDoc = match serde_json::from_value(raw) {
            Ok(d) => d,
            Err(e) => {
                tracing::error!(error = %e, "unreadable cleanup doc, dropping");
                let _ = store.commit(vec![Op::remove(key, Assert::Always)], clock);
                continue;
            }
        };

        let runner = match max_attempts {
            Some(n) => Runner::with_max_attempts(store, n),
            None => Runner::new(store),
        };
        let result = runner.run(clock, |_attempt| {
            match crate::entities::dispatch_cleanup(store, model, &doc, clock.epoch_ms()) {
                Ok(mut ops) => {
                    ops.push(Op::remove(key.clone(), Assert::Always));
                    mse_store::TxnOutcome::Commit(ops)
                }
                Err(e) => mse_store::TxnOutcome::Abort(e),
            }
        });

        match result {
            Ok(_) => processed += 1,
            Err(e) => tracing::warn!(kind = ?doc.kind, target = %doc.target, error = %e, "cleanup handler failed"),
        }
    }
    Ok(processed)
}

#[cfg(test)]
#[path = "cleanup_tests.rs"]
mod tests;
