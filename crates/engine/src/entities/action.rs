// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Actions run against a unit: a name, parameters, a status, and an
//! append-only message log.

use mse_core::{Collection, ModelUuid, Result};
use mse_store::doc::{Assert, DocKey, Op};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ActionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ActionStatus::Completed | ActionStatus::Failed | ActionStatus::Cancelled)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionMessage {
    pub timestamp_ms: u64,
    pub text: String,
    #[serde(default)]
    pub seen: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub model: ModelUuid,
    pub id: String,
    pub receiver: String,
    pub name: String,
    #[serde(default)]
    pub parameters: serde_json::Value,
    #[serde(default)]
    pub status: ActionStatus,
    #[serde(default)]
    pub messages: Vec<ActionMessage>,
}

impl Default for ActionStatus {
    fn default() -> Self {
        ActionStatus::Pending
    }
}

pub fn key(model: ModelUuid, id: &str) -> DocKey {
    DocKey::scoped(model, Collection::Actions, id).expect("actions is model-scoped")
}

impl Action {
    pub fn new(model: ModelUuid, receiver: impl Into<String>, name: impl Into<String>, parameters: serde_json::Value) -> Self {
        Self {
            model,
            id: nanoid::nanoid!(12),
            receiver: receiver.into(),
            name: name.into(),
            parameters,
            status: ActionStatus::Pending,
            messages: Vec::new(),
        }
    }

    pub fn create_op(&self) -> Op {
        Op::insert(key(self.model.clone(), &self.id), serde_json::to_value(self).expect("Action always serializes"))
    }

    /// Append a log line, asserting the message count so two concurrent
    /// log writers can't silently drop each other's line.
    pub fn log_ops(&self, text: impl Into<String>, now_ms: u64) -> Op {
        let mut updated = self.clone();
        updated.messages.push(ActionMessage { timestamp_ms: now_ms, text: text.into(), seen: false });
        Op::update(
            key(self.model.clone(), &self.id),
            Assert::FieldEquals { field: "messages".into(), value: serde_json::to_value(&self.messages).expect("messages always serializes") },
            serde_json::to_value(&updated).expect("Action always serializes"),
        )
    }
}

/// A unit only becomes Dead once its actions are released: any
/// non-terminal action against it is cancelled; terminal ones are
/// removed outright since nothing else references them by id.
pub(crate) fn cleanup_actions_for_dying_unit(store: &mse_store::Store, model: &ModelUuid, unit_name: &str) -> Result<Vec<Op>> {
    let mut ops = Vec::new();
    for (k, raw, _) in store.find(Collection::Actions) {
        if k.model() != Some(model) {
            continue;
        }
        let action: Action = match serde_json::from_value(raw) {
            Ok(a) => a,
            Err(_) => continue,
        };
        if action.receiver != unit_name {
            continue;
        }
        if action.status.is_terminal() {
            ops.push(Op::remove(k, Assert::Always));
        } else {
            let mut cancelled = action.clone();
            cancelled.status = ActionStatus::Cancelled;
            ops.push(Op::update(k, Assert::Always, serde_json::to_value(&cancelled).expect("Action always serializes")));
        }
    }
    Ok(ops)
}

#[cfg(test)]
#[path = "action_tests.rs"]
mod tests;
