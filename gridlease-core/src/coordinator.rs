use std::sync::Arc;

use crate::clock::Clock;
use crate::config::GridConfig;
use crate::error::GridResult;
use crate::infrastructure::VersionedStore;
use crate::retry::{commit_with_retry, Mutation};
use crate::state::{GridKernel, ReserveOutcome, UnlockOutcome};
use crate::types::{CellId, GridSnapshot, Version};
use crate::validation;

/// Reserve / unlock / status on top of a versioned store.
///
/// Holds no lock of its own: every write re-validates against the freshest
/// snapshot inside the CAS loop, so any number of coordinators (in one
/// process or many) can share a store.
#[derive(Clone)]
pub struct ReservationCoordinator {
    store: Arc<dyn VersionedStore>,
    clock: Arc<dyn Clock>,
    config: GridConfig,
}

impl ReservationCoordinator {
    pub fn new(store: Arc<dyn VersionedStore>, clock: Arc<dyn Clock>, config: GridConfig) -> Self {
        Self { store, clock, config }
    }

    pub fn config(&self) -> &GridConfig {
        &self.config
    }

    /// Current snapshot with expired locks removed. Never writes.
    pub fn status(&self) -> GridResult<(GridSnapshot, Version)> {
        let (mut snapshot, version) = self.store.read()?;
        snapshot.prune_expired(self.clock.now_ms());
        Ok((snapshot, version))
    }

    /// Grant or renew locks on `cells` for `owner_id`.
    ///
    /// Cells sold or held by another owner come back in `conflicted`. No
    /// write happens when nothing can be granted.
    pub fn reserve(&self, owner_id: &str, cells: &[CellId], ttl_ms: u64) -> GridResult<ReserveOutcome> {
        validation::validate_owner(owner_id, &self.config)?;
        validation::validate_cells(cells, &self.config)?;
        validation::validate_ttl(ttl_ms, &self.config)?;

        let committed = commit_with_retry(
            self.store.as_ref(),
            self.clock.as_ref(),
            self.config.retry,
            "reserve",
            |snapshot, round| {
                let outcome = GridKernel::reserve(snapshot, owner_id, cells, ttl_ms, round.now);
                Ok(if outcome.granted.is_empty() {
                    Mutation::Skip(outcome)
                } else {
                    Mutation::Commit(outcome)
                })
            },
        )?;

        let outcome = committed.value;
        tracing::info!(
            owner_id = %owner_id,
            granted = outcome.granted.len(),
            conflicted = outcome.conflicted.len(),
            attempts = committed.attempts,
            "Cells reserved"
        );
        Ok(outcome)
    }

    /// Release the caller's locks on `cells`. Idempotent.
    pub fn unlock(&self, owner_id: &str, cells: &[CellId]) -> GridResult<UnlockOutcome> {
        validation::validate_owner(owner_id, &self.config)?;
        validation::validate_cells(cells, &self.config)?;

        let committed = commit_with_retry(
            self.store.as_ref(),
            self.clock.as_ref(),
            self.config.retry,
            "unlock",
            |snapshot, _round| {
                let outcome = GridKernel::unlock(snapshot, owner_id, cells);
                Ok(if outcome.released.is_empty() {
                    Mutation::Skip(outcome)
                } else {
                    Mutation::Commit(outcome)
                })
            },
        )?;

        if !committed.value.released.is_empty() {
            tracing::info!(
                owner_id = %owner_id,
                released = committed.value.released.len(),
                "Cells unlocked"
            );
        }
        Ok(committed.value)
    }

    /// Write back the snapshot with expired locks removed.
    ///
    /// Expiry is already applied on every read, so this only tidies the
    /// stored document. Returns the number of locks dropped.
    pub fn prune_expired(&self) -> GridResult<usize> {
        let committed = commit_with_retry(
            self.store.as_ref(),
            self.clock.as_ref(),
            self.config.retry,
            "prune",
            |_snapshot, round| {
                Ok(if round.pruned == 0 {
                    Mutation::Skip(0)
                } else {
                    Mutation::Commit(round.pruned)
                })
            },
        )?;
        if committed.value > 0 {
            tracing::info!(pruned = committed.value, "Expired locks pruned");
        }
        Ok(committed.value)
    }
}
