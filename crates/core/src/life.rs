// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Alive/Dying/Dead lifecycle every entity advances through.
//!
//! Life only ever moves forward: Alive -> Dying -> Dead. A document whose
//! life reaches Dead is removed by a later pass and never resurrected
//! under the same id.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a persisted entity.
///
/// Ordered so `Life::Alive < Life::Dying < Life::Dead` holds under the
/// derived `PartialOrd`/`Ord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Life {
    Alive = 0,
    Dying = 1,
    Dead = 2,
}

impl Life {
    /// Legacy documents without a life field are treated as Alive (§4.3).
    pub const fn default_legacy() -> Self {
        Life::Alive
    }

    /// True if `self` is a legal predecessor of `next` (a single forward
    /// step, or staying put — advancing to the same state is idempotent).
    pub fn can_advance_to(self, next: Life) -> bool {
        next as u8 >= self as u8
    }

    pub fn is_alive(self) -> bool {
        matches!(self, Life::Alive)
    }

    pub fn is_dying(self) -> bool {
        matches!(self, Life::Dying)
    }

    pub fn is_dead(self) -> bool {
        matches!(self, Life::Dead)
    }
}

impl Default for Life {
    fn default() -> Self {
        Life::default_legacy()
    }
}

crate::simple_display! {
    Life {
        Alive => "alive",
        Dying => "dying",
        Dead => "dead",
    }
}

#[cfg(test)]
#[path = "life_tests.rs"]
mod tests;
