//! Client-side view of the grid, merged from store snapshots and the
//! outcomes of this client's own operations.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::state::{FinalizeOutcome, ReserveOutcome, UnlockOutcome};
use crate::types::{CellId, GridSnapshot, Lock, SoldRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcilePolicy {
    /// How long a foreign lock that vanished from the latest snapshot is
    /// still shown as held, measured from when it was last observed
    pub grace_window_ms: u64,
}

impl Default for ReconcilePolicy {
    fn default() -> Self {
        Self { grace_window_ms: 5000 }
    }
}

/// What the client shows for one cell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CellState {
    Free,
    ReservedMine,
    ReservedOther,
    Sold,
}

/// A foreign lock plus the last time a snapshot contained it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeenLock {
    pub lock: Lock,
    pub last_seen: u64,
}

/// Immutable client view. Every update returns a new value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientView {
    /// Locks this client holds, as confirmed by the store
    pub mine: BTreeMap<CellId, Lock>,
    /// Locks held by anyone else
    pub others: BTreeMap<CellId, SeenLock>,
    /// Sold cells. Entries are never removed.
    pub sold: BTreeMap<CellId, SoldRecord>,
    /// Cells this client unlocked, with the expiry of the lock it released.
    /// A snapshot showing our lock at or below that expiry predates the
    /// unlock and is not adopted.
    #[serde(default)]
    pub released: BTreeMap<CellId, u64>,
}

impl ClientView {
    /// Merge a freshly read snapshot into this view.
    pub fn merge_snapshot(
        &self,
        owner_id: &str,
        remote: &GridSnapshot,
        now: u64,
        policy: ReconcilePolicy,
    ) -> ClientView {
        let mut sold = self.sold.clone();
        for (cell, record) in &remote.sold {
            sold.entry(*cell).or_insert_with(|| record.clone());
        }

        let mut mine: BTreeMap<CellId, Lock> = self
            .mine
            .iter()
            .filter(|(cell, lock)| lock.is_live(now) && !sold.contains_key(cell))
            .map(|(cell, lock)| (*cell, lock.clone()))
            .collect();

        let mut others = BTreeMap::new();
        for (cell, lock) in &remote.locks {
            if !lock.is_live(now) || sold.contains_key(cell) {
                continue;
            }
            if lock.is_owned_by(owner_id) {
                if self.released.get(cell).is_some_and(|exp| lock.expires_at <= *exp) {
                    continue;
                }
                // Local copy wins; adopt only what we did not know about
                mine.entry(*cell).or_insert_with(|| lock.clone());
            } else if !mine.contains_key(cell) {
                others.insert(
                    *cell,
                    SeenLock {
                        lock: lock.clone(),
                        last_seen: now,
                    },
                );
            }
        }

        for (cell, seen) in &self.others {
            if others.contains_key(cell) || mine.contains_key(cell) || sold.contains_key(cell) {
                continue;
            }
            let within_grace = now.saturating_sub(seen.last_seen) < policy.grace_window_ms;
            if within_grace && seen.lock.is_live(now) {
                others.insert(*cell, seen.clone());
            }
        }

        // Forget a release once the store stops showing the old lock or it lapses
        let released = self
            .released
            .iter()
            .filter(|(cell, exp)| {
                **exp > now
                    && remote
                        .locks
                        .get(*cell)
                        .is_some_and(|l| l.is_owned_by(owner_id) && l.expires_at <= **exp)
            })
            .map(|(cell, exp)| (*cell, *exp))
            .collect();

        ClientView {
            mine,
            others,
            sold,
            released,
        }
    }

    /// Record a confirmed reserve: granted cells become ours, conflicted ones
    /// are no longer ours.
    pub fn with_reserve(&self, owner_id: &str, outcome: &ReserveOutcome) -> ClientView {
        let mut next = self.clone();
        for cell in &outcome.granted {
            next.others.remove(cell);
            next.released.remove(cell);
            next.mine.insert(*cell, Lock::new(owner_id, outcome.expires_at));
        }
        for cell in &outcome.conflicted {
            next.mine.remove(cell);
        }
        next
    }

    /// Record a confirmed unlock of `cells`. After a successful unlock the
    /// store holds none of our locks on them, released or not.
    pub fn with_unlock(&self, cells: &[CellId], outcome: &UnlockOutcome) -> ClientView {
        let mut next = self.clone();
        if outcome.ok {
            for cell in cells {
                if let Some(lock) = next.mine.remove(cell) {
                    next.released.insert(*cell, lock.expires_at);
                }
            }
        }
        next
    }

    pub fn with_finalize(&self, outcome: &FinalizeOutcome) -> ClientView {
        let mut next = self.clone();
        if let Some(record) = &outcome.record {
            for cell in &outcome.committed {
                next.mine.remove(cell);
                next.others.remove(cell);
                next.sold.insert(*cell, record.clone());
            }
        }
        for cell in &outcome.taken {
            next.mine.remove(cell);
        }
        next
    }

    pub fn cell_state(&self, cell: CellId, now: u64) -> CellState {
        if self.sold.contains_key(&cell) {
            return CellState::Sold;
        }
        if self.mine.get(&cell).is_some_and(|l| l.is_live(now)) {
            return CellState::ReservedMine;
        }
        if self.others.get(&cell).is_some_and(|s| s.lock.is_live(now)) {
            return CellState::ReservedOther;
        }
        CellState::Free
    }

    /// Every live lock, ours and foreign, as a renderer should draw them
    pub fn merged(&self, now: u64) -> BTreeMap<CellId, Lock> {
        self.others
            .iter()
            .map(|(cell, seen)| (*cell, &seen.lock))
            .chain(self.mine.iter().map(|(cell, lock)| (*cell, lock)))
            .filter(|(cell, lock)| lock.is_live(now) && !self.sold.contains_key(cell))
            .map(|(cell, lock)| (cell, lock.clone()))
            .collect()
    }

    /// Cells this client still holds at `now`, in index order
    pub fn held(&self, now: u64) -> Vec<CellId> {
        self.mine
            .iter()
            .filter(|(_, l)| l.is_live(now))
            .map(|(c, _)| *c)
            .collect()
    }
}

/// Owns one client's [`ClientView`] and swaps it on every event.
#[derive(Debug, Clone)]
pub struct ClientReconciler {
    owner_id: String,
    policy: ReconcilePolicy,
    view: ClientView,
}

impl ClientReconciler {
    pub fn new(owner_id: impl Into<String>, policy: ReconcilePolicy) -> Self {
        Self {
            owner_id: owner_id.into(),
            policy,
            view: ClientView::default(),
        }
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn view(&self) -> &ClientView {
        &self.view
    }

    pub fn apply_snapshot(&mut self, remote: &GridSnapshot, now: u64) -> &ClientView {
        self.view = self.view.merge_snapshot(&self.owner_id, remote, now, self.policy);
        tracing::trace!(
            owner_id = %self.owner_id,
            mine = self.view.mine.len(),
            others = self.view.others.len(),
            sold = self.view.sold.len(),
            "View reconciled"
        );
        &self.view
    }

    pub fn apply_reserve(&mut self, outcome: &ReserveOutcome) -> &ClientView {
        self.view = self.view.with_reserve(&self.owner_id, outcome);
        &self.view
    }

    pub fn apply_unlock(&mut self, cells: &[CellId], outcome: &UnlockOutcome) -> &ClientView {
        self.view = self.view.with_unlock(cells, outcome);
        &self.view
    }

    pub fn apply_finalize(&mut self, outcome: &FinalizeOutcome) -> &ClientView {
        self.view = self.view.with_finalize(outcome);
        &self.view
    }

    pub fn cell_state(&self, cell: CellId, now: u64) -> CellState {
        self.view.cell_state(cell, now)
    }
}
