use std::sync::Arc;

use serde::Serialize;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::engine::matching::{dispatch_locked, reassign, DispatchOutcome};
use crate::models::assignment::AssignmentStatus;
use crate::state::AppState;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub timeouts: usize,
    pub reassigned: usize,
    pub retried: usize,
}

pub async fn run_sweeper(state: Arc<AppState>) {
    let mut ticker = interval(state.config.sweep_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        interval_secs = state.config.sweep_interval.as_secs(),
        offer_window_secs = state.config.offer_window.as_secs(),
        "timeout sweeper started"
    );

    loop {
        ticker.tick().await;
        let report = sweep_once(&state).await;

        if report == SweepReport::default() {
            debug!("sweep found nothing to do");
        } else {
            info!(
                timeouts = report.timeouts,
                reassigned = report.reassigned,
                retried = report.retried,
                "sweep completed"
            );
        }
    }
}

/// One pass over every open order: expires offers older than the offer window and
/// restarts searches that ran out of radius a while ago.
///
/// Each order is handled under its own lock, so an accept or reject racing
/// the sweep either lands first (and the offer is no longer requested) or
/// lands after and finds no offer.
pub async fn sweep_once(state: &Arc<AppState>) -> SweepReport {
    state.metrics.sweep_runs_total.inc();

    let now = state.now();
    let window = state.config.offer_window_chrono();
    let retry_after = state.config.exhausted_retry_chrono();
    let mut report = SweepReport::default();

    for slot in state.open_order_slots() {
        let mut guard = slot.lock().await;
        let slot = &mut *guard;
        let order_id = slot.order.id;

        let expired: Vec<_> = slot
            .assignments
            .iter_mut()
            .filter(|a| a.is_requested() && now - a.requested_at >= window)
            .filter_map(|a| a.resolve(AssignmentStatus::Timeout, now).then_some(a.driver_id))
            .collect();

        for driver_id in expired {
            report.timeouts += 1;
            state.metrics.offer("timeout");

            if !slot.order.is_pending() {
                slot.excluded.insert(driver_id);
                debug!(order_id = %order_id, driver_id = %driver_id, "offer on closed order expired");
                continue;
            }

            info!(order_id = %order_id, driver_id = %driver_id, "offer timed out");
            if let DispatchOutcome::Offered { .. } = reassign(state, slot, driver_id) {
                report.reassigned += 1;
            }
        }

        let idle = slot.order.is_pending() && slot.active_offer().is_none() && !slot.searching;
        let due = slot
            .last_search_ended
            .is_none_or(|ended| now - ended >= retry_after);

        if idle && due {
            report.retried += 1;
            match dispatch_locked(state, slot) {
                DispatchOutcome::Exhausted => {
                    warn!(order_id = %order_id, "retried search found no driver")
                }
                outcome => debug!(order_id = %order_id, outcome = ?outcome, "search retried"),
            }
        }

        state.settle(slot);
    }

    report
}
