// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use mse_core::{Collection, Error, Life, ModelUuid, Result};
use mse_store::doc::{Assert, DocKey, Op};
use serde::{Deserialize, Serialize};

use crate::cleanup::{self, CleanupKind};
use crate::lifecycle;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Application {
    pub model: ModelUuid,
    pub name: String,
    pub charm_ref: String,
    #[serde(default)]
    pub exposed: bool,
    #[serde(default)]
    pub life: Life,
    #[serde(default)]
    pub relation_count: u32,
    #[serde(default)]
    pub unit_count: u32,
    #[serde(default)]
    pub charm_config_hash: String,
    /// `Some(offer_url)` for a remote application.
    #[serde(default)]
    pub remote_offer_url: Option<String>,
}

pub fn key(model: ModelUuid, name: &str) -> DocKey {
    DocKey::scoped(model, Collection::Applications, name).expect("applications is model-scoped")
}

impl Application {
    pub fn new(model: ModelUuid, name: impl Into<String>, charm_ref: impl Into<String>) -> Self {
        Self {
            model,
            name: name.into(),
            charm_ref: charm_ref.into(),
            exposed: false,
            life: Life::Alive,
            relation_count: 0,
            unit_count: 0,
            charm_config_hash: String::new(),
            remote_offer_url: None,
        }
    }

    pub fn create_op(&self) -> Op {
        Op::insert(key(self.model.clone(), &self.name), serde_json::to_value(self).expect("Application always serializes"))
    }

    fn doc_key(&self) -> DocKey {
        key(self.model.clone(), &self.name)
    }
}

/// `Application.Destroy`: sets life=Dying and schedules a cleanup of kind
/// `units-for-dying-application`; if already quiescent (no units, no
/// relations) advances straight to Dead and removes the document.
pub fn destroy_ops(app: &Application, now_ms: u64) -> Result<Vec<Op>> {
    if app.life != Life::Alive {
        // Idempotent: destroying an already-Dying application is a no-op success.
        return Ok(Vec::new());
    }

    let mut dying = app.clone();
    dying.life = Life::Dying;

    if app.unit_count == 0 && app.relation_count == 0 {
        return Ok(vec![lifecycle::remove(app.doc_key())]);
    }

    let mut ops = vec![lifecycle::advance_to_dying(
        app.doc_key(),
        serde_json::to_value(&dying).expect("Application always serializes"),
        now_ms,
    )];
    ops.push(cleanup::schedule(
        app.model.clone(),
        CleanupKind::UnitsForDyingApplication,
        app.name.clone(),
        serde_json::Value::Null,
    ));
    Ok(ops)
}

/// Adjust `unit_count` by `delta`, asserting the prior value so two
/// concurrent adjustments can't race. If the application is Dying and
/// counts reach zero, advances it to Dead and removes its document in
/// the same op set.
pub fn adjust_unit_count(app: &Application, delta: i64) -> Result<Vec<Op>> {
    let new_count = app.unit_count as i64 + delta;
    if new_count < 0 {
        return Err(Error::NotValid(format!("{}: unit_count would go negative", app.name)));
    }
    let mut updated = app.clone();
    updated.unit_count = new_count as u32;

    let assert = Assert::FieldEquals {
        field: "unit_count".into(),
        value: serde_json::Value::from(app.unit_count),
    };
    let mut ops = vec![Op::update(app.doc_key(), assert, serde_json::to_value(&updated).expect("Application always serializes"))];

    if updated.life == Life::Dying && updated.unit_count == 0 && updated.relation_count == 0 {
        ops.push(lifecycle::advance_to_dead(app.doc_key(), serde_json::to_value(&updated).expect("Application always serializes")));
        ops.push(lifecycle::remove(app.doc_key()));
    }
    Ok(ops)
}

/// Destroys every unit of a dying application in one pass. Units still in
/// scope only move to Dying (handled by [`super::unit::destroy_ops`]);
/// units with no scope left are removed directly here, and their combined
/// effect on `unit_count` is folded into a single aggregate decrement —
/// calling `ensure_dead_and_remove` once per unit would instead produce N
/// competing updates to the same application document within this one
/// transaction, each computed from the same pre-transaction snapshot.
pub(crate) fn cleanup_units_for_dying_application(
    store: &mse_store::Store,
    model: &ModelUuid,
    app_name: &str,
    now_ms: u64,
) -> Result<Vec<Op>> {
    let app_key = key(model.clone(), app_name);
    let Some((raw, _)) = store.get(&app_key) else {
        return Ok(Vec::new());
    };
    let app: Application = serde_json::from_value(raw).map_err(|e| Error::NotValid(e.to_string()))?;

    let mut ops = Vec::new();
    let mut removed: u32 = 0;
    for (k, unit_raw, _) in store.find(Collection::Units) {
        if k.model() != Some(model) {
            continue;
        }
        let unit: super::unit::Unit = match serde_json::from_value(unit_raw) {
            Ok(u) => u,
            Err(_) => continue,
        };
        if unit.application != app.name || unit.life != Life::Alive {
            continue;
        }
        if super::unit::is_in_any_scope(store, model, &unit.name) {
            ops.extend(super::unit::destroy_ops(store, model, &unit, now_ms)?);
        } else {
            ops.push(lifecycle::remove(super::unit::key(model.clone(), &unit.name)));
            removed += 1;
        }
    }

    if removed > 0 {
        ops.extend(adjust_unit_count(&app, -(removed as i64))?);
    }
    Ok(ops)
}

#[cfg(test)]
#[path = "application_tests.rs"]
mod tests;
