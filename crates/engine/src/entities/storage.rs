// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Storage instances, their unit attachments, and the volumes/filesystems
//! that back them on a machine. Persistent storage outlives the unit or
//! machine it was attached to; only an explicit destroy/release detaches
//! it for good.

use mse_core::{Collection, Error, Life, ModelUuid, Result};
use mse_store::doc::{Assert, DocKey, Op};
use serde::{Deserialize, Serialize};

use crate::cleanup::{self, CleanupKind};
use crate::lifecycle;

/// Who a storage attachment belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageOwner {
    Unit(String),
    Machine(String),
}

impl std::fmt::Display for StorageOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageOwner::Unit(u) => write!(f, "unit#{u}"),
            StorageOwner::Machine(m) => write!(f, "machine#{m}"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageInstance {
    pub model: ModelUuid,
    /// `<owner>/<n>`.
    pub id: String,
    pub pool: String,
    pub size_mib: u64,
    #[serde(default)]
    pub life: Life,
    /// Survives unit/machine destruction unless explicitly destroyed or released.
    #[serde(default)]
    pub persistent: bool,
    #[serde(default)]
    pub releasing: bool,
}

pub fn instance_key(model: ModelUuid, id: &str) -> DocKey {
    DocKey::scoped(model, Collection::StorageInstances, id).expect("storageInstances is model-scoped")
}

impl StorageInstance {
    pub fn new(model: ModelUuid, id: impl Into<String>, pool: impl Into<String>, size_mib: u64, persistent: bool) -> Self {
        Self { model, id: id.into(), pool: pool.into(), size_mib, life: Life::Alive, persistent, releasing: false }
    }

    pub fn create_op(&self) -> Op {
        Op::insert(instance_key(self.model.clone(), &self.id), serde_json::to_value(self).expect("StorageInstance always serializes"))
    }

    fn doc_key(&self) -> DocKey {
        instance_key(self.model.clone(), &self.id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageAttachment {
    pub model: ModelUuid,
    pub storage_id: String,
    pub owner: StorageOwner,
    #[serde(default)]
    pub life: Life,
}

fn attachment_local_id(storage_id: &str, owner: &StorageOwner) -> String {
    format!("{storage_id}#{owner}")
}

pub fn attachment_key(model: ModelUuid, storage_id: &str, owner: &StorageOwner) -> DocKey {
    DocKey::scoped(model, Collection::StorageAttachments, attachment_local_id(storage_id, owner)).expect("storageAttachments is model-scoped")
}

impl StorageAttachment {
    pub fn new(model: ModelUuid, storage_id: impl Into<String>, owner: StorageOwner) -> Self {
        Self { model, storage_id: storage_id.into(), owner, life: Life::Alive }
    }

    pub fn create_op(&self) -> Op {
        Op::insert(
            attachment_key(self.model.clone(), &self.storage_id, &self.owner),
            serde_json::to_value(self).expect("StorageAttachment always serializes"),
        )
    }

    fn doc_key(&self) -> DocKey {
        attachment_key(self.model.clone(), &self.storage_id, &self.owner)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Volume {
    pub model: ModelUuid,
    /// `<machine>/<n>`.
    pub id: String,
    pub pool: String,
    pub size_mib: u64,
    #[serde(default)]
    pub life: Life,
    #[serde(default)]
    pub persistent: bool,
    #[serde(default)]
    pub provisioning_info: serde_json::Value,
}

pub fn volume_key(model: ModelUuid, id: &str) -> DocKey {
    DocKey::scoped(model, Collection::Volumes, id).expect("volumes is model-scoped")
}

impl Volume {
    pub fn new(model: ModelUuid, id: impl Into<String>, pool: impl Into<String>, size_mib: u64, persistent: bool) -> Self {
        Self { model, id: id.into(), pool: pool.into(), size_mib, life: Life::Alive, persistent, provisioning_info: serde_json::Value::Null }
    }

    pub fn create_op(&self) -> Op {
        Op::insert(volume_key(self.model.clone(), &self.id), serde_json::to_value(self).expect("Volume always serializes"))
    }

    fn doc_key(&self) -> DocKey {
        volume_key(self.model.clone(), &self.id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeAttachment {
    pub model: ModelUuid,
    pub volume_id: String,
    pub machine_id: String,
    #[serde(default)]
    pub life: Life,
}

fn volume_attachment_local_id(volume_id: &str, machine_id: &str) -> String {
    format!("{volume_id}#{machine_id}")
}

pub fn volume_attachment_key(model: ModelUuid, volume_id: &str, machine_id: &str) -> DocKey {
    DocKey::scoped(model, Collection::VolumeAttachments, volume_attachment_local_id(volume_id, machine_id)).expect("volumeAttachments is model-scoped")
}

impl VolumeAttachment {
    pub fn new(model: ModelUuid, volume_id: impl Into<String>, machine_id: impl Into<String>) -> Self {
        Self { model, volume_id: volume_id.into(), machine_id: machine_id.into(), life: Life::Alive }
    }

    pub fn create_op(&self) -> Op {
        Op::insert(
            volume_attachment_key(self.model.clone(), &self.volume_id, &self.machine_id),
            serde_json::to_value(self).expect("VolumeAttachment always serializes"),
        )
    }

    fn doc_key(&self) -> DocKey {
        volume_attachment_key(self.model.clone(), &self.volume_id, &self.machine_id)
    }
}

/// Filesystems mirror volumes; kept as a distinct collection/type pair
/// because a storage instance backed by a filesystem pool never gets a
/// volume document, and vice versa.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Filesystem {
    pub model: ModelUuid,
    pub id: String,
    pub pool: String,
    pub size_mib: u64,
    #[serde(default)]
    pub life: Life,
    #[serde(default)]
    pub persistent: bool,
    #[serde(default)]
    pub provisioning_info: serde_json::Value,
}

pub fn filesystem_key(model: ModelUuid, id: &str) -> DocKey {
    DocKey::scoped(model, Collection::Filesystems, id).expect("filesystems is model-scoped")
}

impl Filesystem {
    pub fn new(model: ModelUuid, id: impl Into<String>, pool: impl Into<String>, size_mib: u64, persistent: bool) -> Self {
        Self { model, id: id.into(), pool: pool.into(), size_mib, life: Life::Alive, persistent, provisioning_info: serde_json::Value::Null }
    }

    pub fn create_op(&self) -> Op {
        Op::insert(filesystem_key(self.model.clone(), &self.id), serde_json::to_value(self).expect("Filesystem always serializes"))
    }

    fn doc_key(&self) -> DocKey {
        filesystem_key(self.model.clone(), &self.id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilesystemAttachment {
    pub model: ModelUuid,
    pub filesystem_id: String,
    pub machine_id: String,
    #[serde(default)]
    pub life: Life,
}

fn filesystem_attachment_local_id(filesystem_id: &str, machine_id: &str) -> String {
    format!("{filesystem_id}#{machine_id}")
}

pub fn filesystem_attachment_key(model: ModelUuid, filesystem_id: &str, machine_id: &str) -> DocKey {
    DocKey::scoped(model, Collection::FilesystemAttachments, filesystem_attachment_local_id(filesystem_id, machine_id))
        .expect("filesystemAttachments is model-scoped")
}

impl FilesystemAttachment {
    pub fn new(model: ModelUuid, filesystem_id: impl Into<String>, machine_id: impl Into<String>) -> Self {
        Self { model, filesystem_id: filesystem_id.into(), machine_id: machine_id.into(), life: Life::Alive }
    }

    pub fn create_op(&self) -> Op {
        Op::insert(
            filesystem_attachment_key(self.model.clone(), &self.filesystem_id, &self.machine_id),
            serde_json::to_value(self).expect("FilesystemAttachment always serializes"),
        )
    }

    fn doc_key(&self) -> DocKey {
        filesystem_attachment_key(self.model.clone(), &self.filesystem_id, &self.machine_id)
    }
}

/// `StorageInstance.Destroy`: sets life=Dying and schedules the attachment
/// cascade. A persistent instance still destroys on an explicit call —
/// persistence only protects it from *implicit* unit/machine cascades.
pub fn destroy_instance_ops(instance: &StorageInstance, now_ms: u64) -> Result<Vec<Op>> {
    if instance.life != Life::Alive {
        return Ok(Vec::new());
    }
    let mut dying = instance.clone();
    dying.life = Life::Dying;
    let mut ops = vec![lifecycle::advance_to_dying(
        instance.doc_key(),
        serde_json::to_value(&dying).expect("StorageInstance always serializes"),
        now_ms,
    )];
    ops.push(cleanup::schedule(
        instance.model.clone(),
        CleanupKind::StorageForDestroyedStorage,
        instance.id.clone(),
        serde_json::Value::Null,
    ));
    Ok(ops)
}

fn attachments_for_storage(store: &mse_store::Store, model: &ModelUuid, storage_id: &str) -> Vec<(DocKey, StorageAttachment)> {
    store
        .find(Collection::StorageAttachments)
        .into_iter()
        .filter(|(k, ..)| k.model() == Some(model))
        .filter_map(|(k, raw, _)| {
            let a: StorageAttachment = serde_json::from_value(raw).ok()?;
            (a.storage_id == storage_id).then_some((k, a))
        })
        .collect()
}

/// A unit being destroyed detaches from its storage: persistent storage
/// is released (attachment removed, instance untouched); non-persistent
/// storage is destroyed outright, which cascades via
/// `storage-for-destroyed-storage`.
pub(crate) fn cleanup_storage_for_dying_unit(store: &mse_store::Store, model: &ModelUuid, unit_name: &str, now_ms: u64) -> Result<Vec<Op>> {
    let owner = StorageOwner::Unit(unit_name.to_string());
    let mut ops = Vec::new();
    for (k, attachment) in store
        .find(Collection::StorageAttachments)
        .into_iter()
        .filter(|(kk, ..)| kk.model() == Some(model))
        .filter_map(|(kk, raw, _)| {
            let a: StorageAttachment = serde_json::from_value(raw).ok()?;
            (a.owner == owner && a.life == Life::Alive).then_some((kk, a))
        })
    {
        let Some((raw, _)) = store.get(&instance_key(model.clone(), &attachment.storage_id)) else {
            ops.push(Op::remove(k, Assert::Always));
            continue;
        };
        let instance: StorageInstance = serde_json::from_value(raw).map_err(|e| Error::NotValid(e.to_string()))?;
        if instance.persistent {
            ops.push(Op::remove(k, Assert::Always));
        } else if instance.life == Life::Alive {
            ops.extend(destroy_instance_ops(&instance, now_ms)?);
        }
    }
    Ok(ops)
}

/// Marks Alive attachments of a destroyed storage instance Dying (the
/// detach signal), removes attachments already Dying, and once none
/// remain removes the instance itself. Reschedules itself while
/// attachments still need a further pass.
pub(crate) fn cleanup_storage_for_destroyed_storage(store: &mse_store::Store, model: &ModelUuid, storage_id: &str, now_ms: u64) -> Result<Vec<Op>> {
    let Some((raw, _)) = store.get(&instance_key(model.clone(), storage_id)) else {
        return Ok(Vec::new());
    };
    let instance: StorageInstance = serde_json::from_value(raw).map_err(|e| Error::NotValid(e.to_string()))?;
    if instance.life == Life::Dead {
        return Ok(Vec::new());
    }

    let attachments = attachments_for_storage(store, model, storage_id);
    if attachments.is_empty() {
        return Ok(vec![lifecycle::remove(instance.doc_key())]);
    }

    let mut ops = Vec::new();
    for (k, attachment) in &attachments {
        match attachment.life {
            Life::Alive => {
                let mut dying = attachment.clone();
                dying.life = Life::Dying;
                ops.push(lifecycle::advance_to_dying(k.clone(), serde_json::to_value(&dying).expect("StorageAttachment always serializes"), now_ms));
            }
            Life::Dying => ops.push(lifecycle::remove(k.clone())),
            Life::Dead => {}
        }
    }
    ops.push(cleanup::schedule(model.clone(), CleanupKind::StorageForDestroyedStorage, storage_id, serde_json::Value::Null));
    Ok(ops)
}

/// Records the concrete provisioning info a storage provider reports back
/// once it has actually created the volume.
pub fn set_volume_info_ops(volume: &Volume, info: serde_json::Value) -> Result<Vec<Op>> {
    let mut provisioned = volume.clone();
    provisioned.provisioning_info = info;
    Ok(vec![Op::update(volume.doc_key(), Assert::Always, serde_json::to_value(&provisioned).expect("Volume always serializes"))])
}

/// A volume can't be attached to a machine until the provider has supplied
/// its provisioning info — there's nothing concrete yet for the machine
/// agent to attach to.
pub fn attach_volume_ops(volume: &Volume, machine_id: impl Into<String>) -> Result<Vec<Op>> {
    if volume.provisioning_info.is_null() {
        return Err(Error::NotProvisioned(volume.id.clone()));
    }
    Ok(vec![VolumeAttachment::new(volume.model.clone(), volume.id.clone(), machine_id).create_op()])
}

/// Records the concrete provisioning info a storage provider reports back
/// once it has actually created the filesystem.
pub fn set_filesystem_info_ops(filesystem: &Filesystem, info: serde_json::Value) -> Result<Vec<Op>> {
    let mut provisioned = filesystem.clone();
    provisioned.provisioning_info = info;
    Ok(vec![Op::update(filesystem.doc_key(), Assert::Always, serde_json::to_value(&provisioned).expect("Filesystem always serializes"))])
}

/// Mirrors [`attach_volume_ops`]: a filesystem can't be attached until it
/// carries provisioning info.
pub fn attach_filesystem_ops(filesystem: &Filesystem, machine_id: impl Into<String>) -> Result<Vec<Op>> {
    if filesystem.provisioning_info.is_null() {
        return Err(Error::NotProvisioned(filesystem.id.clone()));
    }
    Ok(vec![FilesystemAttachment::new(filesystem.model.clone(), filesystem.id.clone(), machine_id).create_op()])
}

/// `DestroyVolume`: sets life=Dying and schedules the attachment cascade.
pub fn destroy_volume_ops(volume: &Volume, now_ms: u64) -> Result<Vec<Op>> {
    if volume.life != Life::Alive {
        return Ok(Vec::new());
    }
    let mut dying = volume.clone();
    dying.life = Life::Dying;
    let mut ops = vec![lifecycle::advance_to_dying(volume.doc_key(), serde_json::to_value(&dying).expect("Volume always serializes"), now_ms)];
    ops.push(cleanup::schedule(volume.model.clone(), CleanupKind::AttachmentsForDyingVolume, volume.id.clone(), serde_json::Value::Null));
    Ok(ops)
}

pub(crate) fn cleanup_attachments_for_dying_volume(store: &mse_store::Store, model: &ModelUuid, volume_id: &str, now_ms: u64) -> Result<Vec<Op>> {
    let Some((raw, _)) = store.get(&volume_key(model.clone(), volume_id)) else {
        return Ok(Vec::new());
    };
    let volume: Volume = serde_json::from_value(raw).map_err(|e| Error::NotValid(e.to_string()))?;
    if volume.life == Life::Dead {
        return Ok(Vec::new());
    }

    let attachments: Vec<(DocKey, VolumeAttachment)> = store
        .find(Collection::VolumeAttachments)
        .into_iter()
        .filter(|(k, ..)| k.model() == Some(model))
        .filter_map(|(k, raw, _)| {
            let a: VolumeAttachment = serde_json::from_value(raw).ok()?;
            (a.volume_id == volume_id).then_some((k, a))
        })
        .collect();

    if attachments.is_empty() {
        return Ok(if volume.life == Life::Dying { vec![lifecycle::remove(volume.doc_key())] } else { Vec::new() });
    }

    let mut ops = Vec::new();
    for (k, attachment) in &attachments {
        match attachment.life {
            Life::Alive => {
                let mut dying = attachment.clone();
                dying.life = Life::Dying;
                ops.push(lifecycle::advance_to_dying(k.clone(), serde_json::to_value(&dying).expect("VolumeAttachment always serializes"), now_ms));
            }
            Life::Dying => ops.push(lifecycle::remove(k.clone())),
            Life::Dead => {}
        }
    }
    ops.push(cleanup::schedule(model.clone(), CleanupKind::AttachmentsForDyingVolume, volume_id, serde_json::Value::Null));
    Ok(ops)
}

pub(crate) fn cleanup_attachments_for_dying_filesystem(store: &mse_store::Store, model: &ModelUuid, filesystem_id: &str, now_ms: u64) -> Result<Vec<Op>> {
    let Some((raw, _)) = store.get(&filesystem_key(model.clone(), filesystem_id)) else {
        return Ok(Vec::new());
    };
    let filesystem: Filesystem = serde_json::from_value(raw).map_err(|e| Error::NotValid(e.to_string()))?;
    if filesystem.life == Life::Dead {
        return Ok(Vec::new());
    }

    let attachments: Vec<(DocKey, FilesystemAttachment)> = store
        .find(Collection::FilesystemAttachments)
        .into_iter()
        .filter(|(k, ..)| k.model() == Some(model))
        .filter_map(|(k, raw, _)| {
            let a: FilesystemAttachment = serde_json::from_value(raw).ok()?;
            (a.filesystem_id == filesystem_id).then_some((k, a))
        })
        .collect();

    if attachments.is_empty() {
        return Ok(if filesystem.life == Life::Dying { vec![lifecycle::remove(filesystem.doc_key())] } else { Vec::new() });
    }

    let mut ops = Vec::new();
    for (k, attachment) in &attachments {
        match attachment.life {
            Life::Alive => {
                let mut dying = attachment.clone();
                dying.life = Life::Dying;
                ops.push(lifecycle::advance_to_dying(k.clone(), serde_json::to_value(&dying).expect("FilesystemAttachment always serializes"), now_ms));
            }
            Life::Dying => ops.push(lifecycle::remove(k.clone())),
            Life::Dead => {}
        }
    }
    ops.push(cleanup::schedule(model.clone(), CleanupKind::AttachmentsForDyingFilesystem, filesystem_id, serde_json::Value::Null));
    Ok(ops)
}

#[cfg(test)]
#[path = "storage_tests.rs"]
mod tests;
