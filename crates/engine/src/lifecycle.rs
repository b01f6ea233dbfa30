// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! C3: the Alive/Dying/Dead transition ops shared by every entity kind.
//!
//! These build [`Op`]s, they don't commit anything themselves — callers
//! compose them with entity-specific ops inside one [`mse_store::Runner`]
//! attempt so a transition and its cascading effects land atomically.

use mse_core::Life;
use mse_store::doc::{Assert, DocKey, Op};
use serde_json::Value;

/// Assert the document is Alive without changing it: a guard op placed
/// alongside an unrelated write so the whole transaction aborts if the
/// entity moved out of Alive underneath the caller. `doc` is the
/// document's current (unchanged) content, rewritten as-is.
pub fn assert_alive(key: DocKey, doc: Value) -> Op {
    Op { key, assert: Assert::LifeEquals(Life::Alive), kind: mse_store::doc::OpKind::Update(doc) }
}

/// `advanceToDying`: sets `life=Dying` and `dying_at=now`, asserting the
/// document is currently Alive. `doc` must already reflect the desired
/// post-transition content other than the life/timestamp fields, which
/// this function overwrites.
pub fn advance_to_dying(key: DocKey, mut doc: Value, now_ms: u64) -> Op {
    set_life(&mut doc, Life::Dying);
    doc["dying_at"] = Value::from(now_ms);
    Op { key, assert: Assert::LifeEquals(Life::Alive), kind: mse_store::doc::OpKind::Update(doc) }
}

/// `advanceToDead`: sets `life=Dead`, asserting the document is currently
/// Dying. Entity-specific cascading preconditions (unit-count=0, etc.)
/// are the caller's responsibility to check and fold into the same
/// transaction batch as additional assert ops.
pub fn advance_to_dead(key: DocKey, mut doc: Value) -> Op {
    set_life(&mut doc, Life::Dead);
    Op { key, assert: Assert::LifeEquals(Life::Dying), kind: mse_store::doc::OpKind::Update(doc) }
}

/// `remove`: unconditionally removes a Dead document. The caller is
/// responsible for removing dependent index documents in the same batch.
pub fn remove(key: DocKey) -> Op {
    Op { key, assert: Assert::Always, kind: mse_store::doc::OpKind::Remove }
}

fn set_life(doc: &mut Value, life: Life) {
    doc["life"] = serde_json::to_value(life).expect("Life always serializes");
}

/// Reads the `life` field off a raw document, defaulting legacy documents
/// (no `life` field) to Alive.
pub fn life_of(doc: &Value) -> Life {
    doc.get("life")
        .and_then(|v| serde_json::from_value::<Life>(v.clone()).ok())
        .unwrap_or_default()
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
