// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use mse_core::{Collection, Error, Life, ModelUuid, Result};
use mse_store::doc::{Assert, DocKey, Op};
use serde::{Deserialize, Serialize};

use crate::cleanup::{self, CleanupKind};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Machine {
    pub model: ModelUuid,
    /// `"0"` or `"0/lxd/1"` for a container.
    pub id: String,
    pub series: String,
    #[serde(default)]
    pub jobs: Vec<String>,
    #[serde(default)]
    pub container_type: Option<String>,
    #[serde(default)]
    pub principal_units: Vec<String>,
    #[serde(default)]
    pub addresses: Vec<String>,
    #[serde(default)]
    pub hardware: serde_json::Value,
    #[serde(default)]
    pub life: Life,
    #[serde(default)]
    pub agent_started_at: Option<u64>,
    #[serde(default)]
    pub upgrade_series_lock: bool,
}

pub const JOB_MANAGE_MODEL: &str = "JobManageModel";

pub fn key(model: ModelUuid, id: &str) -> DocKey {
    DocKey::scoped(model, Collection::Machines, id).expect("machines is model-scoped")
}

impl Machine {
    pub fn new(model: ModelUuid, id: impl Into<String>, series: impl Into<String>) -> Self {
        Self {
            model,
            id: id.into(),
            series: series.into(),
            jobs: Vec::new(),
            container_type: None,
            principal_units: Vec::new(),
            addresses: Vec::new(),
            hardware: serde_json::Value::Null,
            life: Life::Alive,
            agent_started_at: None,
            upgrade_series_lock: false,
        }
    }

    pub fn create_op(&self) -> Op {
        Op::insert(key(self.model.clone(), &self.id), serde_json::to_value(self).expect("Machine always serializes"))
    }

    fn doc_key(&self) -> DocKey {
        key(self.model.clone(), &self.id)
    }

    pub fn is_manager(&self) -> bool {
        self.jobs.iter().any(|j| j == JOB_MANAGE_MODEL)
    }
}

/// `true` if `child` is a direct or nested container of `parent`
/// (`"0/lxd/1"` is contained by `"0"`).
pub fn is_contained_by(child: &str, parent: &str) -> bool {
    child != parent && child.starts_with(&format!("{parent}/"))
}

/// `Machine.ForceDestroy`: schedules a `force-destroyed-machine` cleanup.
/// Calling it twice is idempotent — the second call's cleanup handler
/// sees an already-processed machine and no-ops. A machine carrying
/// `JobManageModel` is rejected with `NoAvailableManager` unless some
/// other Alive manager remains in the model — an already-Dead manager
/// is let through so a retried force-destroy stays idempotent.
pub fn force_destroy_ops(store: &mse_store::Store, model: &ModelUuid, machine_id: &str, _now_ms: u64) -> Result<Vec<Op>> {
    if let Some((raw, _)) = store.get(&key(model.clone(), machine_id)) {
        let target: Machine = serde_json::from_value(raw).map_err(|e| Error::NotValid(e.to_string()))?;
        if target.is_manager() && target.life != Life::Dead {
            let other_manager_available = store
                .find(Collection::Machines)
                .into_iter()
                .filter(|(k, ..)| k.model() == Some(model))
                .filter_map(|(_, raw, _)| serde_json::from_value::<Machine>(raw).ok())
                .any(|m| m.id != target.id && m.life == Life::Alive && m.is_manager());
            if !other_manager_available {
                return Err(Error::NoAvailableManager(target.id.clone()));
            }
        }
    }
    Ok(vec![cleanup::schedule(model.clone(), CleanupKind::ForceDestroyedMachine, machine_id, serde_json::Value::Null)])
}

/// Removes every contained (child) machine, ejects their units from
/// relation scopes, marks the units Dead, detaches non-persistent
/// storage, and finally sets the machine itself to Dead — ready for a
/// provisioner to reap, but not yet removed. A container's id is always
/// its host's id plus a `/`-separated suffix, so every descendant — not
/// just direct children — is found by one prefix scan rather than a
/// recursive walk; that in turn lets every ejected unit across the whole
/// subtree be aggregated into a single transaction instead of one
/// transaction per machine.
pub(crate) fn cleanup_force_destroyed_machine(
    store: &mse_store::Store,
    model: &ModelUuid,
    machine_id: &str,
    _now_ms: u64,
) -> Result<Vec<Op>> {
    let Some((raw, _)) = store.get(&key(model.clone(), machine_id)) else {
        return Ok(Vec::new());
    };
    let root: Machine = serde_json::from_value(raw).map_err(|e| Error::NotValid(e.to_string()))?;
    if root.life == Life::Dead {
        return Ok(Vec::new());
    }

    let machines: Vec<Machine> = store
        .find(Collection::Machines)
        .into_iter()
        .filter(|(k, ..)| k.model() == Some(model))
        .filter_map(|(_, raw, _)| serde_json::from_value::<Machine>(raw).ok())
        .filter(|m| m.id == machine_id || is_contained_by(&m.id, machine_id))
        .collect();

    let mut ops = Vec::new();

    // Every unit assigned to any machine in the subtree, force-ejected
    // together so relation-scope and application-counter effects are
    // each aggregated into one op per relation/application rather than
    // one per unit.
    let units: Vec<super::unit::Unit> = store
        .find(Collection::Units)
        .into_iter()
        .filter(|(k, ..)| k.model() == Some(model))
        .filter_map(|(_, raw, _)| serde_json::from_value::<super::unit::Unit>(raw).ok())
        .filter(|u| u.life != Life::Dead && u.assigned_machine_id.as_deref().is_some_and(|m| machines.iter().any(|mm| mm.id == m)))
        .collect();

    ops.extend(force_eject_units_scope_ops(store, model, &units)?);

    let mut removed_by_app: std::collections::HashMap<String, i64> = std::collections::HashMap::new();
    for unit in &units {
        ops.push(Op::remove(super::unit::key(model.clone(), &unit.name), Assert::Always));
        *removed_by_app.entry(unit.application.clone()).or_insert(0) -= 1;
    }
    for (app_name, delta) in removed_by_app {
        let app_key = super::application::key(model.clone(), &app_name);
        if let Some((raw, _)) = store.get(&app_key) {
            let app: super::application::Application = serde_json::from_value(raw).map_err(|e| Error::NotValid(e.to_string()))?;
            ops.extend(super::application::adjust_unit_count(&app, delta)?);
        }
    }

    // Force-destroy bypasses the normal Alive->Dying->Dead single-step
    // assertions: each machine may be in either state when this cleanup
    // runs, and by design this handler is the one unconditional path to
    // Dead (the provisioner reaps it from there).
    for m in &machines {
        if m.life == Life::Dead {
            continue;
        }
        let mut dead = m.clone();
        dead.life = Life::Dead;
        ops.push(Op::update(m.doc_key(), Assert::Always, serde_json::to_value(&dead).expect("Machine always serializes")));
    }

    Ok(ops)
}

/// Every relation scope occupied by any of `units`, grouped by relation
/// so a relation with more than one ejected occupant gets one combined
/// `unit_count` decrement instead of N competing updates within this one
/// transaction (bypasses the normal `LeaveScope`-driven drain, which
/// force-destroy does not wait for).
fn force_eject_units_scope_ops(store: &mse_store::Store, model: &ModelUuid, units: &[super::unit::Unit]) -> Result<Vec<Op>> {
    let names: std::collections::HashSet<&str> = units.iter().map(|u| u.name.as_str()).collect();
    let mut by_relation: std::collections::HashMap<u64, Vec<(DocKey, super::relation::EndpointRole, String)>> = std::collections::HashMap::new();
    for (k, raw, _) in store.find(Collection::RelationScopes) {
        if k.model() != Some(model) {
            continue;
        }
        let scope: super::relation::ScopeEntry = match serde_json::from_value(raw) {
            Ok(s) => s,
            Err(_) => continue,
        };
        if !names.contains(scope.unit.as_str()) {
            continue;
        }
        by_relation.entry(scope.relation_id).or_default().push((k, scope.role, scope.unit));
    }

    let mut ops = Vec::new();
    for (relation_id, exits) in by_relation {
        match super::relation::find_by_id(store, model, relation_id) {
            Some(relation) => ops.extend(super::relation::leave_scope_many_ops(&relation, &exits)?),
            None => ops.extend(exits.into_iter().map(|(k, ..)| Op::remove(k, Assert::Always))),
        }
    }
    Ok(ops)
}

#[cfg(test)]
#[path = "machine_tests.rs"]
mod tests;
