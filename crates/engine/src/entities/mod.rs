// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! C4: the concrete entity graph. Each submodule owns one entity kind's
//! document shape and the transaction-op builders for its operations;
//! none of them talk to a [`mse_store::Store`] directly except to read
//! the current state they need to decide what to write, since the
//! caller always re-reads and the runner never refreshes on retry.

pub mod action;
pub mod application;
pub mod machine;
pub mod model;
pub mod relation;
pub mod storage;
pub mod unit;
pub mod user;

use mse_core::{ModelUuid, Result};

use crate::cleanup::CleanupDoc;

/// Dispatch a cleanup doc to its entity-specific handler. Returns the
/// additional ops (beyond removing the cleanup doc itself, which the
/// caller appends) needed to make progress on `doc.target`. A target
/// already past the state the cleanup would have acted on resolves to
/// an empty op list, not an error — that's what makes `RunCleanups`
/// idempotent under concurrent mutation.
pub(crate) fn dispatch_cleanup(
    store: &mse_store::Store,
    model: &ModelUuid,
    doc: &CleanupDoc,
    now_ms: u64,
) -> Result<Vec<mse_store::doc::Op>> {
    use crate::cleanup::CleanupKind::*;
    match doc.kind {
        UnitsForDyingApplication => application::cleanup_units_for_dying_application(store, model, &doc.target, now_ms),
        ApplicationsForDyingModel => model::cleanup_applications_for_dying_model(store, model, now_ms),
        MachinesForDyingModel => model::cleanup_machines_for_dying_model(store, model, now_ms),
        ForceDestroyedMachine => machine::cleanup_force_destroyed_machine(store, model, &doc.target, now_ms),
        StorageForDyingUnit => storage::cleanup_storage_for_dying_unit(store, model, &doc.target, now_ms),
        StorageForDestroyedStorage => storage::cleanup_storage_for_destroyed_storage(store, model, &doc.target, now_ms),
        AttachmentsForDyingVolume => storage::cleanup_attachments_for_dying_volume(store, model, &doc.target, now_ms),
        AttachmentsForDyingFilesystem => storage::cleanup_attachments_for_dying_filesystem(store, model, &doc.target, now_ms),
        ActionsForDyingUnit => action::cleanup_actions_for_dying_unit(store, model, &doc.target),
        SettingsForRemovedRelation => relation::cleanup_settings_for_removed_relation(store, model, &doc.target),
        HostedModelsForDyingController => model::cleanup_hosted_models_for_dying_controller(store, model, now_ms),
        ResourceBlob => Ok(Vec::new()),
    }
}
