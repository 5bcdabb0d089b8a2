//! Keeps a reservation alive while the user is in checkout.

use serde::{Deserialize, Serialize};

use crate::client::ReservationApi;
use crate::error::{GridError, GridResult};
use crate::state::{FinalizeOutcome, ReserveOutcome, UnlockOutcome};
use crate::types::{CellId, SalePayload};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// The user cancelled; held cells were unlocked
    Cancelled,
    /// Payment confirmed and finalize returned
    Finalized,
    /// The session went away; unlock was attempted without waiting on it
    NavigatedAway,
    /// Every held cell was lost to another owner
    Lost,
}

/// Renewal state machine for one reservation.
///
/// The caller drives time: `tick` is cheap when the heartbeat is not due, so
/// it can be called from any timer. Taking `&mut self` everywhere means a
/// renewal and a finalize can never overlap for the same session.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    owner_id: String,
    held: Vec<CellId>,
    ttl_ms: u64,
    interval_ms: u64,
    next_due: u64,
    stopped: Option<StopReason>,
}

impl Heartbeat {
    /// `cells` should be the cells granted by the initial reserve.
    pub fn start(
        owner_id: impl Into<String>,
        cells: Vec<CellId>,
        ttl_ms: u64,
        interval_ms: u64,
        now: u64,
    ) -> GridResult<Self> {
        if interval_ms == 0 || interval_ms >= ttl_ms {
            return Err(GridError::validation(format!(
                "heartbeat interval {}ms must be positive and below ttl {}ms",
                interval_ms, ttl_ms
            )));
        }
        if cells.is_empty() {
            return Err(GridError::validation("heartbeat needs at least one held cell"));
        }
        Ok(Self {
            owner_id: owner_id.into(),
            held: cells,
            ttl_ms,
            interval_ms,
            next_due: now.saturating_add(interval_ms),
            stopped: None,
        })
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn held(&self) -> &[CellId] {
        &self.held
    }

    pub fn is_running(&self) -> bool {
        self.stopped.is_none()
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stopped
    }

    pub fn next_due(&self) -> u64 {
        self.next_due
    }

    pub fn is_due(&self, now: u64) -> bool {
        self.is_running() && now >= self.next_due
    }

    /// Renew the held cells if due. Returns `None` when nothing was sent.
    ///
    /// A failed renewal keeps the heartbeat running and schedules the next
    /// attempt one interval later.
    pub fn tick<A>(&mut self, api: &A, now: u64) -> GridResult<Option<ReserveOutcome>>
    where
        A: ReservationApi + ?Sized,
    {
        if !self.is_due(now) {
            return Ok(None);
        }
        self.next_due = now.saturating_add(self.interval_ms);

        let outcome = api.reserve(&self.owner_id, &self.held, self.ttl_ms)?;
        if !outcome.conflicted.is_empty() {
            tracing::warn!(
                owner_id = %self.owner_id,
                lost = outcome.conflicted.len(),
                "Held cells lost during renewal"
            );
            self.held.retain(|c| !outcome.conflicted.contains(c));
        }
        if self.held.is_empty() {
            self.stop(StopReason::Lost);
        }
        Ok(Some(outcome))
    }

    /// Unlock everything and stop. On error the heartbeat keeps running.
    pub fn cancel<A>(&mut self, api: &A) -> GridResult<UnlockOutcome>
    where
        A: ReservationApi + ?Sized,
    {
        let outcome = api.unlock(&self.owner_id, &self.held)?;
        self.stop(StopReason::Cancelled);
        Ok(outcome)
    }

    /// Sell the held cells. The heartbeat stops once the store has answered,
    /// even if some cells came back `taken`.
    pub fn finalize<A>(&mut self, api: &A, payload: &SalePayload) -> GridResult<FinalizeOutcome>
    where
        A: ReservationApi + ?Sized,
    {
        let outcome = api.finalize(&self.owner_id, &self.held, payload)?;
        self.stop(StopReason::Finalized);
        Ok(outcome)
    }

    /// Best-effort unlock for a session that is going away.
    pub fn abandon<A>(&mut self, api: &A)
    where
        A: ReservationApi + ?Sized,
    {
        if let Err(e) = api.unlock(&self.owner_id, &self.held) {
            tracing::debug!(owner_id = %self.owner_id, error = %e, "Unlock on abandon failed");
        }
        self.stop(StopReason::NavigatedAway);
    }

    fn stop(&mut self, reason: StopReason) {
        if self.stopped.is_none() {
            tracing::info!(owner_id = %self.owner_id, reason = ?reason, "Heartbeat stopped");
            self.stopped = Some(reason);
        }
    }
}
