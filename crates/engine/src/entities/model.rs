// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `models` collection: the global registry entry for each model.
//! Unlike every other entity, a model's own document lives in the
//! controller-global partition — `application`/`unit`/etc. documents
//! that belong to it are model-scoped.

use mse_core::{Collection, Error, Life, ModelUuid, Result};
use mse_store::doc::{Assert, DocKey, Op};
use serde::{Deserialize, Serialize};

use crate::cleanup::{self, CleanupKind};
use crate::lifecycle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationMode {
    None,
    Importing,
    Exporting,
}

impl Default for MigrationMode {
    fn default() -> Self {
        MigrationMode::None
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    pub uuid: ModelUuid,
    pub name: String,
    pub owner: String,
    pub cloud: String,
    pub region: String,
    pub credential: String,
    #[serde(default)]
    pub life: Life,
    #[serde(default)]
    pub migration_mode: MigrationMode,
    #[serde(default)]
    pub environ_version: u64,
    /// The controller's own model. Only it may host other models, and it
    /// refuses Destroy while any of them remain unless the caller opts in.
    #[serde(default)]
    pub is_controller: bool,
}

pub fn key(uuid: &ModelUuid) -> DocKey {
    DocKey::global(Collection::Models, uuid.to_string()).expect("models is controller-global")
}

fn name_index_key(owner: &str, name: &str) -> DocKey {
    DocKey::global(Collection::NameIndex, format!("model#{owner}#{name}")).expect("nameIndex is controller-global")
}

impl Model {
    pub fn new(uuid: ModelUuid, name: impl Into<String>, owner: impl Into<String>, cloud: impl Into<String>, region: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            uuid,
            name: name.into(),
            owner: owner.into(),
            cloud: cloud.into(),
            region: region.into(),
            credential: credential.into(),
            life: Life::Alive,
            migration_mode: MigrationMode::None,
            environ_version: 0,
            is_controller: false,
        }
    }

    /// Inserts the model document together with the `owner#name` index
    /// doc that reserves the name — both asserted `DocMissing`, so a
    /// second model created concurrently under a different UUID with the
    /// same owner+name loses the index insert and the whole transaction
    /// is rejected with `AlreadyExists`.
    pub fn create_ops(&self) -> Vec<Op> {
        vec![
            Op::insert(key(&self.uuid), serde_json::to_value(self).expect("Model always serializes")),
            Op::insert(name_index_key(&self.owner, &self.name), serde_json::Value::Null),
        ]
    }
}

/// Optional storage-destruction policy for [`destroy_ops`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyStorage {
    Destroy,
    Release,
}

/// `Model.Destroy(params)`: the controller model refuses to destroy while
/// it still hosts other models unless the caller passes
/// `destroy_hosted_models`, surfacing `HasHostedModels` otherwise. Fails
/// with `HasPersistentStorage` if any non-machine-tied storage remains
/// and no policy was given; otherwise sets life=Dying and enqueues
/// cleanups for hosted models, machines, and applications.
pub fn destroy_ops(
    model: &Model,
    destroy_hosted_models: bool,
    destroy_storage: Option<DestroyStorage>,
    has_persistent_storage: bool,
    hosted_models_exist: bool,
    now_ms: u64,
) -> Result<Vec<Op>> {
    if model.life != Life::Alive {
        return Err(Error::not_alive(model.uuid.to_string()));
    }
    if model.is_controller && hosted_models_exist && !destroy_hosted_models {
        return Err(Error::HasHostedModels(model.uuid.to_string()));
    }
    if has_persistent_storage && destroy_storage.is_none() {
        return Err(Error::HasPersistentStorage(model.uuid.to_string()));
    }

    let mut dying = model.clone();
    dying.life = Life::Dying;
    let mut ops = vec![lifecycle::advance_to_dying(
        key(&model.uuid),
        serde_json::to_value(&dying).expect("Model always serializes"),
        now_ms,
    )];

    if destroy_hosted_models && model.is_controller {
        ops.push(cleanup::schedule(
            model.uuid.clone(),
            CleanupKind::HostedModelsForDyingController,
            model.uuid.to_string(),
            serde_json::Value::Null,
        ));
    }
    ops.push(cleanup::schedule(
        model.uuid.clone(),
        CleanupKind::MachinesForDyingModel,
        model.uuid.to_string(),
        serde_json::Value::Null,
    ));
    ops.push(cleanup::schedule(
        model.uuid.clone(),
        CleanupKind::ApplicationsForDyingModel,
        model.uuid.to_string(),
        serde_json::Value::Null,
    ));

    Ok(ops)
}

/// A Dying model advances to Dead once no machines, applications, or
/// persistent volumes remain.
pub fn maybe_advance_to_dead(store: &mse_store::Store, uuid: &ModelUuid) -> Result<Vec<Op>> {
    let (doc, _) = match store.get(&key(uuid)) {
        Some(d) => d,
        None => return Ok(Vec::new()),
    };
    let model: Model = serde_json::from_value(doc).map_err(|e| Error::NotValid(e.to_string()))?;
    if model.life != Life::Dying {
        return Ok(Vec::new());
    }

    let machines_remain = store.find(Collection::Machines).iter().any(|(k, ..)| k.model() == Some(uuid));
    let apps_remain = store.find(Collection::Applications).iter().any(|(k, ..)| k.model() == Some(uuid));
    let volumes_remain = store.find(Collection::Volumes).into_iter().any(|(k, raw, _)| {
        k.model() == Some(uuid)
            && serde_json::from_value::<super::storage::Volume>(raw).map(|v| v.persistent).unwrap_or(false)
    });
    if machines_remain || apps_remain || volumes_remain {
        return Ok(Vec::new());
    }

    let doc = serde_json::to_value(&model).expect("Model always serializes");
    Ok(vec![lifecycle::advance_to_dead(key(uuid), doc)])
}

pub(crate) fn cleanup_applications_for_dying_model(
    store: &mse_store::Store,
    model: &ModelUuid,
    now_ms: u64,
) -> Result<Vec<Op>> {
    let mut ops = Vec::new();
    for (k, raw, _) in store.find(Collection::Applications) {
        if k.model() != Some(model) {
            continue;
        }
        let app: super::application::Application = match serde_json::from_value(raw) {
            Ok(a) => a,
            Err(_) => continue,
        };
        if app.life == Life::Alive {
            ops.extend(super::application::destroy_ops(&app, now_ms)?);
        }
    }
    ops.extend(maybe_advance_to_dead(store, model)?);
    Ok(ops)
}

pub(crate) fn cleanup_machines_for_dying_model(
    store: &mse_store::Store,
    model: &ModelUuid,
    now_ms: u64,
) -> Result<Vec<Op>> {
    let mut ops = Vec::new();
    for (k, raw, _) in store.find(Collection::Machines) {
        if k.model() != Some(model) {
            continue;
        }
        let m: super::machine::Machine = match serde_json::from_value(raw) {
            Ok(m) => m,
            Err(_) => continue,
        };
        if m.life == Life::Alive {
            ops.extend(super::machine::force_destroy_ops(store, model, &m.id, now_ms)?);
        }
    }
    ops.extend(maybe_advance_to_dead(store, model)?);
    Ok(ops)
}

/// Drives every other Alive model toward Dying, each picking up its own
/// machines/applications cleanup cascade exactly as if its own Destroy had
/// been called directly — the controller's hosted models don't get a say
/// in whether they're destroyed once the controller itself goes.
pub(crate) fn cleanup_hosted_models_for_dying_controller(store: &mse_store::Store, controller: &ModelUuid, now_ms: u64) -> Result<Vec<Op>> {
    let mut ops = Vec::new();
    for (_, raw, _) in store.find(Collection::Models) {
        let hosted: Model = match serde_json::from_value(raw) {
            Ok(m) => m,
            Err(_) => continue,
        };
        if &hosted.uuid == controller || hosted.life != Life::Alive {
            continue;
        }
        let mut dying = hosted.clone();
        dying.life = Life::Dying;
        ops.push(lifecycle::advance_to_dying(key(&hosted.uuid), serde_json::to_value(&dying).expect("Model always serializes"), now_ms));
        ops.push(cleanup::schedule(hosted.uuid.clone(), CleanupKind::MachinesForDyingModel, hosted.uuid.to_string(), serde_json::Value::Null));
        ops.push(cleanup::schedule(hosted.uuid.clone(), CleanupKind::ApplicationsForDyingModel, hosted.uuid.to_string(), serde_json::Value::Null));
    }
    Ok(ops)
}

#[cfg(test)]
#[path = "model_tests.rs"]
mod tests;
