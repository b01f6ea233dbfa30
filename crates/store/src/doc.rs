// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Document keys, ops, and server-side assertions.

use mse_core::{Collection, EntityId, GlobalId, Error, Life, ModelUuid, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A document key, either model-scoped or controller-global.
///
/// The two constructors enforce the partition at the type level: you
/// cannot build a `Scoped` key over a global collection or vice versa.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DocKey {
    Scoped(EntityId),
    Global(GlobalId),
}

impl DocKey {
    pub fn scoped(model: ModelUuid, collection: Collection, local: impl Into<smol_str::SmolStr>) -> Result<Self> {
        if collection.is_global() {
            return Err(Error::NotValid(format!(
                "{collection:?} is a controller-global collection; use DocKey::global"
            )));
        }
        Ok(DocKey::Scoped(EntityId::new(model, collection, local)))
    }

    pub fn global(collection: Collection, local: impl Into<smol_str::SmolStr>) -> Result<Self> {
        if collection.is_model_scoped() {
            return Err(Error::NotValid(format!(
                "{collection:?} is a model-scoped collection; use DocKey::scoped"
            )));
        }
        Ok(DocKey::Global(GlobalId::new(collection, local)))
    }

    pub fn collection(&self) -> Collection {
        match self {
            DocKey::Scoped(e) => e.collection,
            DocKey::Global(g) => g.collection,
        }
    }

    pub fn model(&self) -> Option<&ModelUuid> {
        match self {
            DocKey::Scoped(e) => Some(&e.model),
            DocKey::Global(_) => None,
        }
    }

    /// The wire identifier: `"<modelUUID>:<localID>"` for scoped keys,
    /// bare `localID` for global keys.
    pub fn wire_id(&self) -> String {
        match self {
            DocKey::Scoped(e) => e.to_string(),
            DocKey::Global(g) => g.to_string(),
        }
    }
}

impl std::fmt::Display for DocKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.wire_id())
    }
}

/// A server-side precondition evaluated atomically as part of a commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Assert {
    /// No precondition.
    Always,
    /// The document must not exist (used by insert ops to enforce
    /// uniqueness).
    DocMissing,
    /// The document must exist.
    DocExists,
    /// The document's `life` field must equal the given value (legacy
    /// documents without a `life` field are treated as Alive).
    LifeEquals(Life),
    /// A named integer field must equal the given value (used to guard
    /// reference-count decrements/increments).
    FieldEquals { field: String, value: Value },
    /// A named integer field must be strictly greater than zero (guards
    /// against double-decrement).
    FieldGreaterThanZero { field: String },
}

/// What a transaction op does to its document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OpKind {
    Insert(Value),
    /// Full-document replace. Entity code reads, mutates in memory, and
    /// writes the whole value back — there is no partial-field patch
    /// language, mirroring the teacher's plain-struct-replace style.
    Update(Value),
    Remove,
}

/// One op within a transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Op {
    pub key: DocKey,
    pub assert: Assert,
    pub kind: OpKind,
}

impl Op {
    pub fn insert(key: DocKey, doc: Value) -> Self {
        Op { key, assert: Assert::DocMissing, kind: OpKind::Insert(doc) }
    }

    pub fn update(key: DocKey, assert: Assert, doc: Value) -> Self {
        Op { key, assert, kind: OpKind::Update(doc) }
    }

    pub fn remove(key: DocKey, assert: Assert) -> Self {
        Op { key, assert, kind: OpKind::Remove }
    }
}

/// The revision a document was last written at. `-1` denotes deletion;
/// never observed on a live document.
pub type Revision = i64;

pub const DELETED_REVISION: Revision = -1;

/// One tuple from the change feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeFeedEntry {
    pub collection: Collection,
    pub id: String,
    pub revno: Revision,
}

impl ChangeFeedEntry {
    pub fn is_deletion(&self) -> bool {
        self.revno == DELETED_REVISION
    }
}

#[cfg(test)]
#[path = "doc_tests.rs"]
mod tests;
