// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! User identities are an external collaborator (authentication and
//! account provisioning live outside this engine); no user entity is
//! persisted here. This module only validates the owner-reference
//! strings carried on owned entities such as [`super::model::Model`].

use mse_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// A validated user reference, e.g. `"alice"` or `"alice@external"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserRef(String);

impl UserRef {
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(Error::NotValid("user reference must not be empty".into()));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
#[path = "user_tests.rs"]
mod tests;
