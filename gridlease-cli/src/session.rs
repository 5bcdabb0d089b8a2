//! `gridlease hold`: keep a reservation alive from the terminal, the way a
//! checkout page does, until the user stops it or it is finalized.

use std::time::Duration;

use gridlease_core::clock::now_ms;
use gridlease_core::heartbeat::{Heartbeat, StopReason};
use gridlease_core::reconciler::{CellState, ClientReconciler, ReconcilePolicy};
use gridlease_core::types::{CellId, SalePayload};
use gridlease_core::ReservationApi;

pub struct HoldOptions {
    pub owner_id: String,
    pub cells: Vec<CellId>,
    pub ttl_ms: u64,
    pub interval_ms: u64,
    pub poll_ms: u64,
    pub policy: ReconcilePolicy,
    /// Stop after this long; `None` holds until Ctrl-C
    pub hold_for: Option<Duration>,
    /// Finalize instead of unlocking when the hold ends
    pub finalize_with: Option<SalePayload>,
}

/// Blocking API calls run inline on the runtime worker
fn blocking<T>(f: impl FnOnce() -> T) -> T {
    tokio::task::block_in_place(f)
}

/// Time left until the heartbeat is due, measured on the wall clock
fn until_due(heartbeat: &Heartbeat) -> Duration {
    Duration::from_millis(heartbeat.next_due().saturating_sub(now_ms()))
}

/// Hold cells until Ctrl-C or `opts.hold_for`. Renewal runs on its own
/// timer; status polling only refreshes the local view.
pub async fn hold<A: ReservationApi>(api: A, opts: HoldOptions) -> Result<(), String> {
    let mut reconciler = ClientReconciler::new(opts.owner_id.clone(), opts.policy);

    let first = blocking(|| api.reserve(&opts.owner_id, &opts.cells, opts.ttl_ms)).map_err(|e| e.to_string())?;
    reconciler.apply_reserve(&first);
    println!(
        "reserved {} cell(s), {} conflicted, expires at {}",
        first.granted.len(),
        first.conflicted.len(),
        first.expires_at
    );
    if first.granted.is_empty() {
        return Err("none of the requested cells could be reserved".to_string());
    }

    let mut heartbeat = Heartbeat::start(
        opts.owner_id.clone(),
        first.granted.clone(),
        opts.ttl_ms,
        opts.interval_ms,
        now_ms(),
    )
    .map_err(|e| e.to_string())?;

    let mut poll = tokio::time::interval(Duration::from_millis(opts.poll_ms.max(100)));
    let deadline = opts.hold_for.map(|d| tokio::time::Instant::now() + d);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let renew = tokio::time::sleep(until_due(&heartbeat));
        let hold_over = async {
            match deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = poll.tick() => {
                match blocking(|| api.status()) {
                    Ok(snapshot) => {
                        reconciler.apply_snapshot(&snapshot, now_ms());
                    }
                    Err(e) => tracing::warn!(error = %e, "Status poll failed"),
                }
            }
            _ = renew => {
                match blocking(|| heartbeat.tick(&api, now_ms())) {
                    Ok(Some(outcome)) => {
                        reconciler.apply_reserve(&outcome);
                        tracing::debug!(held = heartbeat.held().len(), expires_at = outcome.expires_at, "Reservation renewed");
                    }
                    Ok(None) => {}
                    Err(e) => tracing::warn!(error = %e, retryable = e.is_retryable(), "Renewal failed, will retry"),
                }
                if !heartbeat.is_running() {
                    break;
                }
            }
            _ = hold_over => {
                finish(&api, &mut heartbeat, &mut reconciler, opts.finalize_with.as_ref())?;
                break;
            }
            _ = &mut ctrl_c => {
                println!("interrupted, releasing cells");
                let cells = heartbeat.held().to_vec();
                match blocking(|| heartbeat.cancel(&api)) {
                    Ok(outcome) => {
                        reconciler.apply_unlock(&cells, &outcome);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Unlock failed, locks will lapse at expiry");
                        heartbeat.abandon(&api);
                    }
                }
                break;
            }
        }
    }

    let now = now_ms();
    let sold_mine = first
        .granted
        .iter()
        .filter(|c| {
            reconciler.cell_state(**c, now) == CellState::Sold
                && reconciler.view().sold.get(*c).is_some_and(|r| r.owner_id == opts.owner_id)
        })
        .count();
    println!(
        "hold ended ({:?}); still held: {}, sold to you: {}",
        heartbeat.stop_reason(),
        reconciler.view().held(now).len(),
        sold_mine
    );

    match heartbeat.stop_reason() {
        Some(StopReason::Lost) => Err("all held cells were lost".to_string()),
        _ => Ok(()),
    }
}

fn finish<A: ReservationApi>(
    api: &A,
    heartbeat: &mut Heartbeat,
    reconciler: &mut ClientReconciler,
    payload: Option<&SalePayload>,
) -> Result<(), String> {
    match payload {
        Some(payload) => {
            let outcome = blocking(|| heartbeat.finalize(api, payload)).map_err(|e| e.to_string())?;
            reconciler.apply_finalize(&outcome);
            println!(
                "finalized {} cell(s), {} taken, region {}",
                outcome.committed.len(),
                outcome.taken.len(),
                outcome.region_id.as_deref().unwrap_or("-")
            );
        }
        None => {
            let cells = heartbeat.held().to_vec();
            let outcome = blocking(|| heartbeat.cancel(api)).map_err(|e| e.to_string())?;
            reconciler.apply_unlock(&cells, &outcome);
            println!("released {} cell(s)", outcome.released.len());
        }
    }
    Ok(())
}
