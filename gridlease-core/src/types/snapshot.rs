use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::{CellId, GridDims, Lock, Region, RegionId, SoldRecord};

/// The entire document held by the store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GridSnapshot {
    #[serde(default)]
    pub sold: BTreeMap<CellId, SoldRecord>,
    #[serde(default)]
    pub locks: BTreeMap<CellId, Lock>,
    #[serde(default)]
    pub regions: BTreeMap<RegionId, Region>,
}

/// Cell counts derived from a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridStats {
    pub sold: usize,
    pub locked: usize,
    pub free: u64,
    pub regions: usize,
}

impl GridSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_sold(&self, cell: CellId) -> bool {
        self.sold.contains_key(&cell)
    }

    /// The lock on `cell` if it is still valid at `now`
    pub fn live_lock(&self, cell: CellId, now: u64) -> Option<&Lock> {
        self.locks.get(&cell).filter(|l| l.is_live(now))
    }

    /// Drop every lock with `expires_at <= now`. Returns the number dropped.
    pub fn prune_expired(&mut self, now: u64) -> usize {
        let before = self.locks.len();
        self.locks.retain(|_, lock| lock.is_live(now));
        before - self.locks.len()
    }

    /// Copy of this snapshot with expired locks removed
    pub fn pruned(&self, now: u64) -> Self {
        let mut out = self.clone();
        out.prune_expired(now);
        out
    }

    /// Locks held by `owner_id` that are valid at `now`
    pub fn locks_of<'a>(
        &'a self,
        owner_id: &'a str,
        now: u64,
    ) -> impl Iterator<Item = (CellId, &'a Lock)> + 'a {
        self.locks
            .iter()
            .filter(move |(_, l)| l.is_owned_by(owner_id) && l.is_live(now))
            .map(|(c, l)| (*c, l))
    }

    pub fn stats(&self, dims: GridDims, now: u64) -> GridStats {
        let locked = self.locks.values().filter(|l| l.is_live(now)).count();
        let sold = self.sold.len();
        GridStats {
            sold,
            locked,
            free: dims
                .cell_count()
                .saturating_sub(sold as u64)
                .saturating_sub(locked as u64),
            regions: self.regions.len(),
        }
    }

    /// No cell is both sold and locked
    pub fn check_exclusive(&self) -> Result<(), String> {
        match self.locks.iter().find(|(cell, _)| self.sold.contains_key(cell)) {
            Some((cell, lock)) => Err(format!("cell {} is both sold and locked by {}", cell, lock.owner_id)),
            None => Ok(()),
        }
    }

    /// Checks the commit invariants against `write_time`:
    /// no sold cell carries a lock, and every stored lock is still live.
    pub fn check_invariants(&self, write_time: u64) -> Result<(), String> {
        self.check_exclusive()?;
        for (cell, lock) in &self.locks {
            if !lock.is_live(write_time) {
                return Err(format!(
                    "cell {} carries an expired lock ({} <= {})",
                    cell, lock.expires_at, write_time
                ));
            }
        }
        Ok(())
    }
}
