// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use mse_core::{Collection, Error, Life, ModelUuid, Result};
use mse_store::doc::{DocKey, Op};
use serde::{Deserialize, Serialize};

use crate::cleanup::{self, CleanupKind};
use crate::lifecycle;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Unit {
    pub model: ModelUuid,
    /// `<app>/<n>`.
    pub name: String,
    pub application: String,
    /// Parent unit name for a subordinate; empty for a principal.
    #[serde(default)]
    pub principal: String,
    #[serde(default)]
    pub subordinates: Vec<String>,
    #[serde(default)]
    pub assigned_machine_id: Option<String>,
    #[serde(default)]
    pub life: Life,
    #[serde(default)]
    pub agent_status: String,
    #[serde(default)]
    pub charm_url: String,
    #[serde(default)]
    pub pending_actions: Vec<String>,
}

pub fn key(model: ModelUuid, name: &str) -> DocKey {
    DocKey::scoped(model, Collection::Units, name).expect("units is model-scoped")
}

impl Unit {
    pub fn new(model: ModelUuid, application: impl Into<String>, index: u32) -> Self {
        let application = application.into();
        let name = format!("{application}/{index}");
        Self {
            model,
            name,
            application,
            principal: String::new(),
            subordinates: Vec::new(),
            assigned_machine_id: None,
            life: Life::Alive,
            agent_status: String::new(),
            charm_url: String::new(),
            pending_actions: Vec::new(),
        }
    }

    pub fn create_op(&self) -> Op {
        Op::insert(key(self.model.clone(), &self.name), serde_json::to_value(self).expect("Unit always serializes"))
    }

    fn doc_key(&self) -> DocKey {
        key(self.model.clone(), &self.name)
    }
}

/// `true` if `unit` occupies any non-departing relation scope.
pub(crate) fn is_in_any_scope(store: &mse_store::Store, model: &ModelUuid, unit_name: &str) -> bool {
    store.find(Collection::RelationScopes).into_iter().any(|(k, raw, _)| {
        if k.model() != Some(model) {
            return false;
        }
        let scope: super::relation::ScopeEntry = match serde_json::from_value(raw) {
            Ok(s) => s,
            Err(_) => return false,
        };
        scope.unit == unit_name && !scope.departing
    })
}

/// `Unit.Destroy`: if in scope anywhere, sets life=Dying (scope departure
/// itself is driven by the owning relation's `LeaveScope`); schedules
/// storage and action cleanups. Otherwise proceeds straight to
/// `EnsureDead`/`Remove`.
pub fn destroy_ops(store: &mse_store::Store, model: &ModelUuid, unit: &Unit, now_ms: u64) -> Result<Vec<Op>> {
    if unit.life != Life::Alive {
        return Ok(Vec::new());
    }

    if is_in_any_scope(store, model, &unit.name) {
        let mut dying = unit.clone();
        dying.life = Life::Dying;
        let mut ops = vec![lifecycle::advance_to_dying(
            unit.doc_key(),
            serde_json::to_value(&dying).expect("Unit always serializes"),
            now_ms,
        )];
        ops.push(cleanup::schedule(model.clone(), CleanupKind::StorageForDyingUnit, unit.name.clone(), serde_json::Value::Null));
        ops.push(cleanup::schedule(model.clone(), CleanupKind::ActionsForDyingUnit, unit.name.clone(), serde_json::Value::Null));
        Ok(ops)
    } else {
        ensure_dead_and_remove_ops(store, model, unit)
    }
}

/// `Unit.EnsureDead / Remove`: removes the unit doc and decrements the
/// owning application's `unit_count` atomically; if the application is
/// Dying and its counts reach zero this also advances it to Dead.
pub fn ensure_dead_and_remove_ops(store: &mse_store::Store, model: &ModelUuid, unit: &Unit) -> Result<Vec<Op>> {
    let app_key = super::application::key(model.clone(), &unit.application);
    let Some((raw, _)) = store.get(&app_key) else {
        // Application already gone; just remove the unit doc.
        return Ok(vec![lifecycle::remove(unit.doc_key())]);
    };
    let app: super::application::Application = serde_json::from_value(raw).map_err(|e| Error::NotValid(e.to_string()))?;

    let mut ops = vec![lifecycle::remove(unit.doc_key())];
    ops.extend(super::application::adjust_unit_count(&app, -1)?);
    Ok(ops)
}

/// Called once a unit has departed every relation scope it occupied, to
/// resume the destruction path that [`destroy_ops`] deferred.
pub fn maybe_ensure_dead_and_remove(store: &mse_store::Store, model: &ModelUuid, unit: &Unit) -> Result<Vec<Op>> {
    if unit.life == Life::Dying && !is_in_any_scope(store, model, &unit.name) {
        ensure_dead_and_remove_ops(store, model, unit)
    } else {
        Ok(Vec::new())
    }
}

#[cfg(test)]
#[path = "unit_tests.rs"]
mod tests;
