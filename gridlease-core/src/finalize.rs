use std::sync::Arc;

use crate::clock::Clock;
use crate::config::GridConfig;
use crate::error::GridResult;
use crate::infrastructure::VersionedStore;
use crate::retry::{commit_with_retry, Mutation};
use crate::state::{FinalizeOutcome, GridKernel};
use crate::types::{CellId, RegionId, SalePayload};
use crate::validation;

/// Turns held reservations into sold records.
///
/// Payment confirmation happens before `finalize` is called; from here on
/// the sale is unconditional for every cell that is still available.
#[derive(Clone)]
pub struct FinalizationCommitter {
    store: Arc<dyn VersionedStore>,
    clock: Arc<dyn Clock>,
    config: GridConfig,
}

impl FinalizationCommitter {
    pub fn new(store: Arc<dyn VersionedStore>, clock: Arc<dyn Clock>, config: GridConfig) -> Self {
        Self { store, clock, config }
    }

    /// Sell `cells` to `owner_id`.
    ///
    /// `committed` cells are final. `taken` cells were sold (or are held by
    /// someone else) and must be dropped from the purchase.
    pub fn finalize(
        &self,
        owner_id: &str,
        cells: &[CellId],
        payload: &SalePayload,
    ) -> GridResult<FinalizeOutcome> {
        validation::validate_owner(owner_id, &self.config)?;
        validation::validate_cells(cells, &self.config)?;
        let payload = validation::normalize_payload(payload, &self.config)?;
        let region_id: RegionId = nanoid::nanoid!(12);

        let committed = commit_with_retry(
            self.store.as_ref(),
            self.clock.as_ref(),
            self.config.retry,
            "finalize",
            |snapshot, round| {
                // Re-partitioned every round: a racing finalize may have sold
                // some of these cells since the last read
                let outcome = GridKernel::finalize(
                    snapshot,
                    owner_id,
                    cells,
                    &payload,
                    &region_id,
                    self.config.dims,
                    round.now,
                );
                Ok(if outcome.committed.is_empty() {
                    Mutation::Skip(outcome)
                } else {
                    Mutation::Commit(outcome)
                })
            },
        )?;

        let outcome = committed.value;
        if outcome.is_partial() {
            tracing::warn!(
                owner_id = %owner_id,
                committed = outcome.committed.len(),
                taken = outcome.taken.len(),
                "Finalize partially failed"
            );
        } else {
            tracing::info!(
                owner_id = %owner_id,
                committed = outcome.committed.len(),
                region_id = ?outcome.region_id,
                "Cells sold"
            );
        }
        Ok(outcome)
    }

    /// Attach an asset URL to a sold region. Re-applying the same URL is a no-op.
    pub fn set_asset_url(&self, region_id: &str, url: &str) -> GridResult<String> {
        let url = validation::normalize_link(url)?;

        commit_with_retry(
            self.store.as_ref(),
            self.clock.as_ref(),
            self.config.retry,
            "set_asset_url",
            |snapshot, _round| {
                Ok(if GridKernel::set_asset_url(snapshot, region_id, &url)? {
                    Mutation::Commit(())
                } else {
                    Mutation::Skip(())
                })
            },
        )?;

        tracing::info!(region_id = %region_id, asset_url = %url, "Region asset linked");
        Ok(url)
    }
}
