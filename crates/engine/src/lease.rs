// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! C7: time-bounded leases against a global clock, the substrate
//! leadership queries are built on.
//!
//! Lease time lives entirely in global-epoch nanoseconds; the only place
//! it is ever rebased onto a caller's local clock is [`legacy_leases`].
//! Claim/Renew/Expire/Revoke are pure op-builders over a lease the
//! caller already read, the same discipline every other entity module
//! in this crate follows: the caller re-reads, the transaction runner
//! never refreshes a stale value on retry.

use mse_core::{Collection, Error, ModelUuid, Result};
use mse_store::doc::{Assert, DocKey, Op};
use mse_store::Store;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lease {
    pub model: ModelUuid,
    pub namespace: String,
    pub name: String,
    pub holder: String,
    /// Global-epoch start, nanoseconds.
    pub start: u64,
    /// Duration, nanoseconds.
    pub duration: u64,
    pub writer: String,
}

impl Lease {
    pub fn end(&self) -> u64 {
        self.start.saturating_add(self.duration)
    }

    pub fn is_live_at(&self, global_now_ns: u64) -> bool {
        self.end() > global_now_ns
    }
}

fn local_id(namespace: &str, name: &str) -> String {
    format!("{namespace}#{name}")
}

pub fn key(model: ModelUuid, namespace: &str, name: &str) -> DocKey {
    DocKey::scoped(model, Collection::Leases, local_id(namespace, name)).expect("leases is model-scoped")
}

fn legacy_key(model: ModelUuid, namespace: &str, name: &str) -> DocKey {
    DocKey::scoped(model, Collection::Leases, format!("legacy#{}", local_id(namespace, name))).expect("leases is model-scoped")
}

/// Look up the live lease (if any) for `(namespace, name)`.
pub fn find(store: &Store, model: &ModelUuid, namespace: &str, name: &str) -> Option<Lease> {
    store.get(&key(model.clone(), namespace, name)).and_then(|(doc, _)| serde_json::from_value(doc).ok())
}

/// `Claim`: inserts a lease for `(namespace, name)` if none is currently
/// live. `existing` is whatever [`find`] returned just before this call;
/// if it is stale (another claim landed between the read and the
/// commit) the write is guarded by an assertion on the value actually
/// read, and the transaction runner retries the whole attempt.
pub fn claim_ops(
    existing: Option<&Lease>,
    model: ModelUuid,
    namespace: &str,
    name: &str,
    holder: &str,
    duration_ns: u64,
    writer: &str,
    global_now_ns: u64,
) -> Result<Vec<Op>> {
    let new_lease = Lease {
        model: model.clone(),
        namespace: namespace.to_string(),
        name: name.to_string(),
        holder: holder.to_string(),
        start: global_now_ns,
        duration: duration_ns,
        writer: writer.to_string(),
    };
    let doc = serde_json::to_value(&new_lease).expect("Lease always serializes");
    let k = key(model, namespace, name);

    match existing {
        None => Ok(vec![Op::insert(k, doc)]),
        Some(lease) if lease.is_live_at(global_now_ns) => {
            Err(Error::AlreadyExists(format!("lease {namespace}/{name} is held by {}", lease.holder)))
        }
        Some(lease) => Ok(vec![Op::update(k, Assert::FieldEquals { field: "start".into(), value: serde_json::Value::from(lease.start) }, doc)]),
    }
}

/// `Renew`: extends a lease the caller already holds. Fails if `holder`
/// no longer matches what was read, or the lease has already expired
/// (a lapsed lease must go back through `Claim`).
pub fn renew_ops(existing: &Lease, model: ModelUuid, namespace: &str, name: &str, holder: &str, duration_ns: u64, global_now_ns: u64) -> Result<Vec<Op>> {
    if existing.holder != holder {
        return Err(Error::NotValid(format!("{namespace}/{name} is held by {}, not {holder}", existing.holder)));
    }
    if !existing.is_live_at(global_now_ns) {
        return Err(Error::not_found(format!("lease {namespace}/{name}")));
    }
    let renewed = Lease { start: global_now_ns, duration: duration_ns, ..existing.clone() };
    let k = key(model, namespace, name);
    Ok(vec![Op::update(
        k,
        Assert::FieldEquals { field: "holder".into(), value: serde_json::Value::from(existing.holder.clone()) },
        serde_json::to_value(&renewed).expect("Lease always serializes"),
    )])
}

/// `Expire`: removes a lease once its end time has passed. A lease that
/// is still live cannot be expired out from under its holder.
pub fn expire_ops(existing: &Lease, model: ModelUuid, namespace: &str, name: &str, global_now_ns: u64) -> Result<Vec<Op>> {
    if existing.is_live_at(global_now_ns) {
        return Err(Error::NotValid(format!("lease {namespace}/{name} has not expired yet")));
    }
    let k = key(model, namespace, name);
    Ok(vec![Op::remove(k, Assert::FieldEquals { field: "start".into(), value: serde_json::Value::from(existing.start) })])
}

/// `Revoke`: force-removes a lease regardless of expiry. `holder` must
/// match the caller's view of who currently holds it.
pub fn revoke_ops(existing: &Lease, model: ModelUuid, namespace: &str, name: &str, holder: &str) -> Result<Vec<Op>> {
    if existing.holder != holder {
        return Err(Error::NotValid(format!("{namespace}/{name} is held by {}, not {holder}", existing.holder)));
    }
    let k = key(model, namespace, name);
    Ok(vec![Op::remove(k, Assert::FieldEquals { field: "holder".into(), value: serde_json::Value::from(holder) })])
}

/// `LegacyLeases(localNow)`: every lease in `model`, paired with its
/// effective local expiry — the only rebasing of lease time onto a
/// caller's own clock this module ever does.
pub fn legacy_leases(store: &Store, model: &ModelUuid, local_now_ns: u64, global_now_ns: u64) -> Vec<(Lease, u64)> {
    store
        .find(Collection::Leases)
        .into_iter()
        .filter(|(k, ..)| k.model() == Some(model) && !k.wire_id().contains("legacy#"))
        .filter_map(|(_, raw, _)| serde_json::from_value::<Lease>(raw).ok())
        .map(|lease| {
            let remaining = lease.end().saturating_sub(global_now_ns);
            (lease, local_now_ns.saturating_add(remaining))
        })
        .collect()
}

/// Pre-global-epoch lease shape: `expiry_ms` was a local wall-clock
/// timestamp rather than a global-epoch `(start, duration)` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyLeaseDoc {
    pub namespace: String,
    pub name: String,
    pub holder: String,
    pub expiry_ms: u64,
}

/// Migrates one legacy lease document into the current `(start,
/// duration)` shape under a fixed initial duration. Safe to run
/// concurrently with live claims: the insert of the migrated form is
/// guarded by `DocMissing`, so if a live `Claim` already created the
/// canonical key first, this op fails harmlessly and the caller treats
/// it as already migrated.
pub fn migrate_legacy_lease_ops(legacy: &LegacyLeaseDoc, model: ModelUuid, fixed_duration_ns: u64, global_now_ns: u64) -> Vec<Op> {
    let old_key = legacy_key(model.clone(), &legacy.namespace, &legacy.name);
    let new_key = key(model.clone(), &legacy.namespace, &legacy.name);
    let migrated = Lease {
        model,
        namespace: legacy.namespace.clone(),
        name: legacy.name.clone(),
        holder: legacy.holder.clone(),
        start: global_now_ns,
        duration: fixed_duration_ns,
        writer: legacy.holder.clone(),
    };
    vec![
        Op::remove(old_key, Assert::DocExists),
        Op::insert(new_key, serde_json::to_value(&migrated).expect("Lease always serializes")),
    ]
}

#[cfg(test)]
#[path = "lease_tests.rs"]
mod tests;
