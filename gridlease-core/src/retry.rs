//! The bounded compare-and-swap loop shared by every write.

use crate::clock::Clock;
use crate::error::{GridError, GridResult};
use crate::infrastructure::{CasOutcome, VersionedStore};
use crate::types::{GridSnapshot, Version};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Read-evaluate-CAS rounds before giving up with `Contention`
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3 }
    }
}

/// What an evaluation round decided to do with the working snapshot
pub enum Mutation<T> {
    /// Write the working snapshot back, then return the value
    Commit(T),
    /// Nothing changed; return the value without writing
    Skip(T),
}

/// Per-round context handed to the evaluation closure
#[derive(Debug, Clone, Copy)]
pub struct Round {
    pub now: u64,
    /// 1-based attempt number
    pub attempt: u32,
    /// Expired locks dropped from this round's snapshot before evaluation
    pub pruned: usize,
}

/// Outcome of a finished CAS loop
#[derive(Debug, Clone)]
pub struct Committed<T> {
    pub value: T,
    /// Version written, or `None` if no write was needed
    pub version: Option<Version>,
    /// Rounds used (1 = first try)
    pub attempts: u32,
}

/// Runs `read → prune expired → apply → compare_and_swap` until the write
/// lands or the attempt budget is spent.
///
/// `apply` is re-run from scratch against a fresh snapshot on every round,
/// so it must derive everything from the snapshot it is given. Store errors
/// are returned as-is: a timed-out write may have landed, and only the caller
/// can decide whether re-issuing is safe.
pub fn commit_with_retry<T>(
    store: &dyn VersionedStore,
    clock: &dyn Clock,
    policy: RetryPolicy,
    op: &str,
    mut apply: impl FnMut(&mut GridSnapshot, Round) -> GridResult<Mutation<T>>,
) -> GridResult<Committed<T>> {
    let max_attempts = policy.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        let (mut snapshot, version) = store.read()?;
        let now = clock.now_ms();
        let pruned = snapshot.prune_expired(now);
        let round = Round {
            now,
            attempt,
            pruned,
        };

        let value = match apply(&mut snapshot, round)? {
            // Pruning alone does not justify a write
            Mutation::Skip(value) => {
                return Ok(Committed {
                    value,
                    version: None,
                    attempts: attempt,
                });
            }
            Mutation::Commit(value) => value,
        };

        match store.compare_and_swap(&snapshot, &version)? {
            CasOutcome::Committed(new_version) => {
                tracing::debug!(op, attempt, version = %new_version, "Snapshot committed");
                return Ok(Committed {
                    value,
                    version: Some(new_version),
                    attempts: attempt,
                });
            }
            CasOutcome::Conflict => {
                tracing::debug!(op, attempt, expected = %version, "Version conflict, re-reading");
            }
        }
    }

    tracing::warn!(op, attempts = max_attempts, "Compare-and-swap retry budget exhausted");
    Err(GridError::Contention {
        attempts: max_attempts,
    })
}
