// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! C8: the migration facade. Export walks a model's documents into a
//! plain-data description; import allocates a fresh model UUID and
//! replays that description into it under `migration-mode = importing`,
//! left inactive until an explicit activation call.

use mse_core::{Collection, Error, ModelUuid, Result};
use mse_store::doc::{Assert, DocKey, Op};
use mse_store::Store;
use serde::{Deserialize, Serialize};

use crate::entities::model::{self, MigrationMode, Model};

/// Every model-scoped collection export/import moves as a unit. Global
/// collections (`models`, `controllerNodes`, ...) are handled separately
/// since there is exactly one model document per export, not a set.
const MODEL_SCOPED_COLLECTIONS: &[Collection] = &[
    Collection::Applications,
    Collection::Units,
    Collection::Machines,
    Collection::Relations,
    Collection::RelationScopes,
    Collection::Settings,
    Collection::StorageInstances,
    Collection::StorageAttachments,
    Collection::Volumes,
    Collection::VolumeAttachments,
    Collection::Filesystems,
    Collection::FilesystemAttachments,
    Collection::Actions,
];

/// One exported document: its collection, its model-local id, and its
/// content exactly as stored (no handles, no store references).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportedDoc {
    pub collection: Collection,
    pub local_id: String,
    pub content: serde_json::Value,
}

/// A whole model's worth of documents, independent of any particular
/// store or model UUID until [`import`] assigns one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelExport {
    pub model: Model,
    pub docs: Vec<ExportedDoc>,
}

/// Read every entity belonging to `model` out of `store` into an
/// in-memory description. The model itself must exist and be readable;
/// documents that fail to round-trip through their serde shape are
/// skipped rather than aborting the whole export, mirroring the
/// tolerance the cleanup pipeline shows toward unreadable docs.
pub fn export(store: &Store, model_uuid: &ModelUuid) -> Result<ModelExport> {
    let (raw, _) = store.get(&model::key(model_uuid)).ok_or_else(|| Error::not_found(model_uuid.to_string()))?;
    let model: Model = serde_json::from_value(raw).map_err(|e| Error::NotValid(e.to_string()))?;

    let mut docs = Vec::new();
    for &collection in MODEL_SCOPED_COLLECTIONS {
        for (key, content, _) in store.find(collection) {
            if key.model() != Some(model_uuid) {
                continue;
            }
            let local_id = match &key {
                DocKey::Scoped(entity) => entity.local.to_string(),
                DocKey::Global(_) => continue,
            };
            docs.push(ExportedDoc { collection, local_id, content });
        }
    }
    Ok(ModelExport { model, docs })
}

/// Import `export` into `store` under a freshly allocated model UUID.
/// Every document lands in one transaction: the model document (with
/// `migration_mode = Importing`) plus every exported document, each
/// re-keyed onto the new UUID and, where the document shape itself
/// carries a `model` field, rewritten to match.
///
/// The returned UUID is not active: callers must call [`activate`]
/// before the model is usable.
pub fn import(store: &Store, export: &ModelExport, clock: &impl mse_core::Clock) -> Result<ModelUuid> {
    let new_uuid = ModelUuid::new();

    let mut imported_model = export.model.clone();
    imported_model.uuid = new_uuid.clone();
    imported_model.migration_mode = MigrationMode::Importing;

    let mut ops = vec![Op::insert(model::key(&new_uuid), serde_json::to_value(&imported_model).expect("Model always serializes"))];

    for doc in &export.docs {
        let key = DocKey::scoped(new_uuid.clone(), doc.collection, doc.local_id.as_str())
            .map_err(|e| Error::NotValid(e.to_string()))?;
        let mut content = doc.content.clone();
        if let Some(obj) = content.as_object_mut() {
            if obj.contains_key("model") {
                obj.insert("model".to_string(), serde_json::to_value(&new_uuid).expect("ModelUuid always serializes"));
            }
        }
        ops.push(Op::insert(key, content));
    }

    store.commit(ops, clock)?;
    Ok(new_uuid)
}

/// Flip a model out of `migration_mode = Importing` once the caller is
/// satisfied the imported state is complete and consistent. Fails if the
/// model isn't actually mid-import, so a caller can't accidentally
/// activate a model twice or one that was never imported.
pub fn activate(store: &Store, uuid: &ModelUuid) -> Result<Vec<Op>> {
    let (raw, _) = store.get(&model::key(uuid)).ok_or_else(|| Error::not_found(uuid.to_string()))?;
    let mut imported: Model = serde_json::from_value(raw).map_err(|e| Error::NotValid(e.to_string()))?;
    if imported.migration_mode != MigrationMode::Importing {
        return Err(Error::NotValid(format!("model {uuid} is not mid-import")));
    }
    imported.migration_mode = MigrationMode::None;
    Ok(vec![Op::update(
        model::key(uuid),
        Assert::Always,
        serde_json::to_value(&imported).expect("Model always serializes"),
    )])
}

#[cfg(test)]
#[path = "migration_tests.rs"]
mod tests;
