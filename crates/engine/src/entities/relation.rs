// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use mse_core::{Collection, Error, Life, ModelUuid, Result};
use mse_store::doc::{Assert, DocKey, Op};
use serde::{Deserialize, Serialize};

use crate::cleanup::{self, CleanupKind};
use crate::lifecycle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointRole {
    Provider,
    Requirer,
    Peer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointScope {
    Global,
    Container,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub application: String,
    pub role: EndpointRole,
    pub interface: String,
    pub scope: EndpointScope,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub model: ModelUuid,
    pub id: u64,
    pub endpoints: (Endpoint, Endpoint),
    #[serde(default)]
    pub life: Life,
    #[serde(default)]
    pub suspended: bool,
    #[serde(default)]
    pub unit_count: u32,
}

/// Wire format `"<appA>:<epA> <appB>:<epB>"`.
fn local_id(endpoints: &(Endpoint, Endpoint)) -> String {
    format!(
        "{}:{} {}:{}",
        endpoints.0.application, endpoints.0.interface, endpoints.1.application, endpoints.1.interface
    )
}

pub fn key(model: ModelUuid, endpoints: &(Endpoint, Endpoint)) -> DocKey {
    DocKey::scoped(model, Collection::Relations, local_id(endpoints)).expect("relations is model-scoped")
}

impl Relation {
    pub fn new(model: ModelUuid, id: u64, a: Endpoint, b: Endpoint) -> Self {
        Self { model, id, endpoints: (a, b), life: Life::Alive, suspended: false, unit_count: 0 }
    }

    pub fn create_op(&self) -> Op {
        Op::insert(key(self.model.clone(), &self.endpoints), serde_json::to_value(self).expect("Relation always serializes"))
    }

    fn doc_key(&self) -> DocKey {
        key(self.model.clone(), &self.endpoints)
    }
}

/// A `(relation, unit)` occupancy marker. Local id is
/// `"r#<relId>#<role>#<unit>"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeEntry {
    pub relation_id: u64,
    pub role: EndpointRole,
    pub unit: String,
    #[serde(default)]
    pub departing: bool,
}

fn scope_local_id(relation_id: u64, role: EndpointRole, unit: &str) -> String {
    let role_tag = match role {
        EndpointRole::Provider => "provider",
        EndpointRole::Requirer => "requirer",
        EndpointRole::Peer => "peer",
    };
    format!("r#{relation_id}#{role_tag}#{unit}")
}

pub fn scope_key(model: ModelUuid, relation_id: u64, role: EndpointRole, unit: &str) -> DocKey {
    DocKey::scoped(model, Collection::RelationScopes, scope_local_id(relation_id, role, unit)).expect("relationScopes is model-scoped")
}

/// Settings for a `(relation, unit)` pair. `version` increases strictly
/// on every content change.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    pub version: u64,
    pub content: serde_json::Map<String, serde_json::Value>,
}

fn settings_local_id(relation_id: u64, unit: &str) -> String {
    format!("r#{relation_id}#{unit}")
}

pub fn settings_key(model: ModelUuid, relation_id: u64, unit: &str) -> DocKey {
    DocKey::scoped(model, Collection::Settings, settings_local_id(relation_id, unit)).expect("settings is model-scoped")
}

/// Enter scope: insert the scope doc and bump `unit_count`.
pub fn enter_scope_ops(relation: &Relation, role: EndpointRole, unit: &str) -> Vec<Op> {
    let entry = ScopeEntry { relation_id: relation.id, role, unit: unit.to_string(), departing: false };
    let key = scope_key(relation.model.clone(), relation.id, role, unit);
    let mut updated = relation.clone();
    updated.unit_count += 1;
    vec![
        Op::insert(key, serde_json::to_value(entry).expect("ScopeEntry always serializes")),
        Op::update(
            relation.doc_key(),
            Assert::FieldEquals { field: "unit_count".into(), value: serde_json::Value::from(relation.unit_count) },
            serde_json::to_value(&updated).expect("Relation always serializes"),
        ),
    ]
}

/// `Relation.LeaveScope`: decrements the scope counter; if the relation
/// is Dying and the counter reaches zero, removes the relation and
/// schedules its settings for cleanup in the same transaction.
pub fn leave_scope_ops(relation: &Relation, role: EndpointRole, unit: &str) -> Result<Vec<Op>> {
    let k = scope_key(relation.model.clone(), relation.id, role, unit);
    leave_scope_many_ops(relation, &[(k, role, unit.to_string())])
}

/// Like [`leave_scope_ops`] but for several occupants departing the same
/// relation at once: the scope counter is decremented by the whole batch
/// in one op, instead of one op per occupant racing over the same
/// relation document within a single transaction.
pub fn leave_scope_many_ops(relation: &Relation, exits: &[(DocKey, EndpointRole, String)]) -> Result<Vec<Op>> {
    if exits.is_empty() {
        return Ok(Vec::new());
    }
    let n = exits.len() as u32;
    if relation.unit_count < n {
        return Err(Error::NotValid(format!(
            "relation {}: {n} units leaving scope but only {} occupy it",
            relation.id, relation.unit_count
        )));
    }

    let mut updated = relation.clone();
    updated.unit_count -= n;

    let mut ops: Vec<Op> = exits.iter().map(|(k, ..)| Op::remove(k.clone(), Assert::DocExists)).collect();
    ops.push(Op::update(
        relation.doc_key(),
        Assert::FieldEquals { field: "unit_count".into(), value: serde_json::Value::from(relation.unit_count) },
        serde_json::to_value(&updated).expect("Relation always serializes"),
    ));

    if updated.life == Life::Dying && updated.unit_count == 0 {
        ops.push(lifecycle::remove(relation.doc_key()));
        ops.push(cleanup::schedule(
            relation.model.clone(),
            CleanupKind::SettingsForRemovedRelation,
            relation.id.to_string(),
            serde_json::Value::Null,
        ));
    }
    Ok(ops)
}

/// `Relation.Destroy`: if no units are in scope, removes the relation
/// immediately and schedules its settings for cleanup; otherwise sets
/// life=Dying and waits for `LeaveScope` to drain the scope.
pub fn destroy_ops(relation: &Relation, now_ms: u64) -> Result<Vec<Op>> {
    if relation.life != Life::Alive {
        return Ok(Vec::new());
    }
    if relation.unit_count == 0 {
        let mut ops = vec![lifecycle::remove(relation.doc_key())];
        ops.push(cleanup::schedule(
            relation.model.clone(),
            CleanupKind::SettingsForRemovedRelation,
            relation.id.to_string(),
            serde_json::Value::Null,
        ));
        return Ok(ops);
    }
    let mut dying = relation.clone();
    dying.life = Life::Dying;
    Ok(vec![lifecycle::advance_to_dying(
        relation.doc_key(),
        serde_json::to_value(&dying).expect("Relation always serializes"),
        now_ms,
    )])
}

/// Look up a relation by its numeric id, scanning `relations` (there is
/// no secondary index; relation lookups by id are rare compared to
/// lookups by endpoint pair).
pub fn find_by_id(store: &mse_store::Store, model: &ModelUuid, id: u64) -> Option<Relation> {
    store
        .find(Collection::Relations)
        .into_iter()
        .filter(|(k, ..)| k.model() == Some(model))
        .find_map(|(_, raw, _)| {
            let relation: Relation = serde_json::from_value(raw).ok()?;
            (relation.id == id).then_some(relation)
        })
}

pub(crate) fn cleanup_settings_for_removed_relation(store: &mse_store::Store, model: &ModelUuid, relation_id: &str) -> Result<Vec<Op>> {
    let prefix = format!("r#{relation_id}#");
    let ops = store
        .find(Collection::Settings)
        .into_iter()
        .filter(|(k, ..)| k.model() == Some(model) && k.wire_id().contains(&prefix))
        .map(|(k, ..)| Op::remove(k, Assert::Always))
        .collect();
    Ok(ops)
}

#[cfg(test)]
#[path = "relation_tests.rs"]
mod tests;
