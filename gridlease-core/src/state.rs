//! Pure evaluation of grid operations against a working snapshot.
//!
//! Nothing here touches a store or a clock: callers hand in the snapshot and
//! `now`, and the kernel mutates the snapshot in place and reports what it
//! did. The CAS loop in `retry` decides whether the result gets written.

use serde::{Deserialize, Serialize};

use crate::error::{GridError, GridResult};
use crate::types::{CellId, GridDims, GridSnapshot, Lock, Region, RegionId, SalePayload, SoldRecord};

/// Why a cell could not be granted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictReason {
    /// The cell already carries a sold record
    Sold,
    /// Another owner holds a live lock
    LockedBy { owner_id: String, expires_at: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CellVerdict {
    Grant,
    Conflict(ConflictReason),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveOutcome {
    pub granted: Vec<CellId>,
    pub conflicted: Vec<CellId>,
    /// Expiry written on every granted cell
    pub expires_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockOutcome {
    pub ok: bool,
    /// Cells whose lock was actually removed
    pub released: Vec<CellId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizeOutcome {
    pub committed: Vec<CellId>,
    pub taken: Vec<CellId>,
    /// Region created for the committed cells
    pub region_id: Option<RegionId>,
    /// The record written on every committed cell
    pub record: Option<SoldRecord>,
}

impl FinalizeOutcome {
    /// Non-empty `taken` means the caller must ask the user to reselect
    pub fn is_partial(&self) -> bool {
        !self.taken.is_empty()
    }
}

pub struct GridKernel;

impl GridKernel {
    /// A cell may be granted to `owner_id` if it is unsold and either
    /// unlocked, expired, or already locked by the same owner.
    pub fn evaluate_cell(snapshot: &GridSnapshot, owner_id: &str, cell: CellId, now: u64) -> CellVerdict {
        if snapshot.is_sold(cell) {
            return CellVerdict::Conflict(ConflictReason::Sold);
        }
        match snapshot.live_lock(cell, now) {
            Some(lock) if !lock.is_owned_by(owner_id) => CellVerdict::Conflict(ConflictReason::LockedBy {
                owner_id: lock.owner_id.clone(),
                expires_at: lock.expires_at,
            }),
            _ => CellVerdict::Grant,
        }
    }

    /// Grants or renews locks. Same-owner cells are always re-granted with a
    /// fresh expiry, never duplicated.
    pub fn reserve(
        snapshot: &mut GridSnapshot,
        owner_id: &str,
        cells: &[CellId],
        ttl_ms: u64,
        now: u64,
    ) -> ReserveOutcome {
        let expires_at = now.saturating_add(ttl_ms);
        let mut granted = Vec::new();
        let mut conflicted = Vec::new();

        for &cell in cells {
            match Self::evaluate_cell(snapshot, owner_id, cell, now) {
                CellVerdict::Grant => {
                    snapshot.locks.insert(cell, Lock::new(owner_id, expires_at));
                    granted.push(cell);
                }
                CellVerdict::Conflict(_) => conflicted.push(cell),
            }
        }

        ReserveOutcome {
            granted,
            conflicted,
            expires_at,
        }
    }

    /// Removes locks held by `owner_id`. Free or foreign cells are skipped.
    pub fn unlock(snapshot: &mut GridSnapshot, owner_id: &str, cells: &[CellId]) -> UnlockOutcome {
        let mut released = Vec::new();
        for &cell in cells {
            let owned = snapshot
                .locks
                .get(&cell)
                .is_some_and(|lock| lock.is_owned_by(owner_id));
            if owned {
                snapshot.locks.remove(&cell);
                released.push(cell);
            }
        }
        UnlockOutcome { ok: true, released }
    }

    /// Converts cells into sold records.
    ///
    /// A cell is `taken` if it is already sold (by anyone, including the
    /// caller) or if another owner holds a live lock on it. Every other cell
    /// is committed under one shared region.
    pub fn finalize(
        snapshot: &mut GridSnapshot,
        owner_id: &str,
        cells: &[CellId],
        payload: &SalePayload,
        region_id: &str,
        dims: GridDims,
        now: u64,
    ) -> FinalizeOutcome {
        let mut committable = Vec::new();
        let mut taken = Vec::new();
        for &cell in cells {
            match Self::evaluate_cell(snapshot, owner_id, cell, now) {
                CellVerdict::Grant => committable.push(cell),
                CellVerdict::Conflict(_) => taken.push(cell),
            }
        }

        let Some(rect) = dims.bounding_rect(&committable) else {
            return FinalizeOutcome {
                committed: Vec::new(),
                taken,
                region_id: None,
                record: None,
            };
        };

        let record = SoldRecord {
            owner_id: owner_id.to_string(),
            name: payload.name.clone(),
            link: payload.link.clone(),
            rect,
            region_id: region_id.to_string(),
            created_at: now,
            metadata: payload.metadata.clone(),
        };

        for &cell in &committable {
            snapshot.locks.remove(&cell);
            snapshot.sold.insert(cell, record.clone());
        }
        snapshot.regions.insert(
            region_id.to_string(),
            Region {
                owner_id: owner_id.to_string(),
                rect,
                asset_url: None,
            },
        );

        FinalizeOutcome {
            committed: committable,
            taken,
            region_id: Some(region_id.to_string()),
            record: Some(record),
        }
    }

    /// Sets the asset URL of a region. Returns `false` if it was already set
    /// to the same value.
    pub fn set_asset_url(snapshot: &mut GridSnapshot, region_id: &str, url: &str) -> GridResult<bool> {
        let region = snapshot
            .regions
            .get_mut(region_id)
            .ok_or_else(|| GridError::UnknownRegion(region_id.to_string()))?;
        if region.asset_url.as_deref() == Some(url) {
            return Ok(false);
        }
        region.asset_url = Some(url.to_string());
        Ok(true)
    }
}
