// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! C2: the transaction runner. Builds a batch of ops against a fresh read
//! of current state, commits it, and retries from scratch when the
//! store's assertions reject the batch because something else moved
//! concurrently under optimistic concurrency control.

use mse_core::{Clock, Error, Result};

use crate::doc::{ChangeFeedEntry, Op};
use crate::store::Store;

/// Default number of attempts before giving up with
/// [`Error::ExcessiveContention`]. "A few dozen" per the design; chosen
/// high enough that a well-behaved builder only loses to a genuine
/// thundering herd, never to ordinary single-writer jitter.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 40;

/// What a transaction builder decided to do on a given attempt.
pub enum TxnOutcome {
    /// Commit this batch of ops.
    Commit(Vec<Op>),
    /// Nothing needs to change; stop without committing or retrying.
    NoOp,
    /// Give up immediately with this error, bypassing the retry loop
    /// (used when the builder detects a non-retryable precondition
    /// failure itself, e.g. the target entity is already Dead).
    Abort(Error),
}

/// Retries a transaction builder against a [`Store`] until it commits,
/// the builder reports [`TxnOutcome::NoOp`] or [`TxnOutcome::Abort`], or
/// the attempt budget is exhausted.
pub struct Runner<'a> {
    store: &'a Store,
    max_attempts: u32,
}

impl<'a> Runner<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store, max_attempts: DEFAULT_MAX_ATTEMPTS }
    }

    pub fn with_max_attempts(store: &'a Store, max_attempts: u32) -> Self {
        Self { store, max_attempts }
    }

    /// Run `build` (called fresh on every attempt, so it should re-read
    /// current state each time rather than close over a stale snapshot)
    /// until it commits or gives up.
    pub fn run<F>(&self, clock: &impl Clock, mut build: F) -> Result<Vec<ChangeFeedEntry>>
    where
        F: FnMut(u32) -> TxnOutcome,
    {
        for attempt in 0..self.max_attempts {
            match build(attempt) {
                TxnOutcome::NoOp => return Ok(Vec::new()),
                TxnOutcome::Abort(err) => return Err(err),
                TxnOutcome::Commit(ops) => match self.store.commit(ops, clock) {
                    Ok(feed) => return Ok(feed),
                    Err(err) if is_retryable(&err) => {
                        tracing::debug!(attempt, error = %err, "transaction aborted, retrying");
                        continue;
                    }
                    Err(err) => return Err(err),
                },
            }
        }
        Err(Error::ExcessiveContention(format!(
            "gave up after {} attempts",
            self.max_attempts
        )))
    }
}

/// Every assertion kind in [`crate::doc::Assert`] surfaces as one of these
/// four error variants when it fails. A failure here means the builder's
/// snapshot of state is stale, not that the operation can never succeed:
/// the next attempt re-reads current state and may find the assertion now
/// holds (or the builder may itself choose to `Abort` once it sees the
/// state really has moved on permanently).
fn is_retryable(err: &Error) -> bool {
    matches!(
        err,
        Error::AlreadyExists(_) | Error::NotFound(_) | Error::NotAlive(_) | Error::ExcessiveContention(_)
    )
}

#[cfg(test)]
#[path = "txn_tests.rs"]
mod tests;
