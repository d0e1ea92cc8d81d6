//! Radius-expanding candidate search and offer creation.
//!
//! The first tier is evaluated inline by the caller. When it yields nobody,
//! the remaining tiers run in a spawned task that sleeps `radius_wait`
//! between tiers, re-taking the order lock for every attempt so that a
//! cancel or acceptance in the meantime stops the search before it commits.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::assignment::{Assignment, AssignmentStatus};
use crate::models::notification::DispatchEvent;
use crate::state::{AppState, OrderSlot};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Offered {
        assignment_id: Uuid,
        driver_id: Uuid,
        radius_km: f64,
    },
    /// Nobody in the first tier; wider tiers follow after the radius wait.
    Searching { next_radius_km: f64 },
    Exhausted,
    Skipped { reason: &'static str },
}

/// Starts a search for `order_id` unless one is already running or an offer
/// is outstanding.
pub async fn dispatch(state: &Arc<AppState>, order_id: Uuid) -> Result<DispatchOutcome, AppError> {
    let slot = state.order_slot(order_id)?;
    let mut guard = slot.lock().await;
    Ok(dispatch_locked(state, &mut guard))
}

/// External retry trigger for an order that is still waiting for a driver.
pub async fn retry_dispatch(
    state: &Arc<AppState>,
    order_id: Uuid,
) -> Result<DispatchOutcome, AppError> {
    let slot = state.order_slot(order_id)?;
    let mut guard = slot.lock().await;
    if !guard.order.is_pending() {
        return Err(AppError::Conflict(format!(
            "order {order_id} is {:?}, only pending orders can be re-dispatched",
            guard.order.status
        )));
    }
    Ok(dispatch_locked(state, &mut guard))
}

/// Excludes `driver_id` from the order for good and searches again.
///
/// The caller holds the order lock and has already resolved the driver's
/// offer, so the next offer is created in the same exclusive section.
pub fn reassign(state: &Arc<AppState>, slot: &mut OrderSlot, driver_id: Uuid) -> DispatchOutcome {
    slot.excluded.insert(driver_id);
    dispatch_locked(state, slot)
}

pub fn dispatch_locked(state: &Arc<AppState>, slot: &mut OrderSlot) -> DispatchOutcome {
    let order_id = slot.order.id;

    if let Some(reason) = skip_reason(slot) {
        debug!(order_id = %order_id, reason, "dispatch skipped");
        return DispatchOutcome::Skipped { reason };
    }

    let tiers = state.config.radius_tiers();
    let started = Instant::now();

    if let Some(outcome) = try_radius(state, slot, tiers[0]) {
        state
            .metrics
            .search_finished("offered", started.elapsed().as_secs_f64());
        return outcome;
    }

    match tiers.get(1) {
        Some(&next_radius_km) => {
            slot.searching = true;
            info!(
                order_id = %order_id,
                radius_km = tiers[0],
                next_radius_km,
                wait_secs = state.config.radius_wait.as_secs(),
                "no driver in radius; widening search after wait"
            );
            tokio::spawn(continue_search(state.clone(), order_id, 1, started));
            DispatchOutcome::Searching { next_radius_km }
        }
        None => {
            finish_exhausted(state, slot, started);
            DispatchOutcome::Exhausted
        }
    }
}

fn skip_reason(slot: &OrderSlot) -> Option<&'static str> {
    if !slot.order.is_pending() {
        Some("order is not pending")
    } else if slot.active_offer().is_some() {
        Some("offer already outstanding")
    } else if slot.searching {
        Some("search already in flight")
    } else {
        None
    }
}

async fn continue_search(state: Arc<AppState>, order_id: Uuid, first_tier: usize, started: Instant) {
    let tiers = state.config.radius_tiers();

    for (index, &radius_km) in tiers.iter().enumerate().skip(first_tier) {
        sleep(state.config.radius_wait).await;

        let Ok(slot) = state.order_slot(order_id) else {
            warn!(order_id = %order_id, "order vanished during search");
            return;
        };
        let mut guard = slot.lock().await;

        if !guard.order.is_pending() || guard.active_offer().is_some() {
            guard.searching = false;
            guard.last_search_ended = Some(state.now());
            state
                .metrics
                .search_finished("abandoned", started.elapsed().as_secs_f64());
            info!(
                order_id = %order_id,
                status = ?guard.order.status,
                "search abandoned; order no longer waiting for a driver"
            );
            return;
        }

        if try_radius(&state, &mut guard, radius_km).is_some() {
            guard.searching = false;
            state
                .metrics
                .search_finished("offered", started.elapsed().as_secs_f64());
            return;
        }

        if index + 1 == tiers.len() {
            finish_exhausted(&state, &mut guard, started);
            return;
        }

        debug!(order_id = %order_id, radius_km, "no driver in radius; widening search after wait");
    }
}

/// Offers the order to the best candidate within `radius_km`, if any.
fn try_radius(state: &AppState, slot: &mut OrderSlot, radius_km: f64) -> Option<DispatchOutcome> {
    let pickup = slot.order.pickup()?;
    let now = state.now();

    let candidate = state
        .locator
        .query_candidates(&pickup, radius_km, &slot.excluded, now)
        .into_iter()
        .next()?;

    let assignment = Assignment {
        id: Uuid::new_v4(),
        order_id: slot.order.id,
        driver_id: candidate.driver_id,
        status: AssignmentStatus::Requested,
        radius_km,
        distance_km: candidate.distance_km,
        destination_match: candidate.destination_match,
        requested_at: now,
        responded_at: None,
    };
    slot.assignments.push(assignment.clone());

    state.notifier.notify(
        assignment.driver_id,
        DispatchEvent::OfferCreated {
            order_id: slot.order.id,
            order_code: slot.order.code.clone(),
            assignment_id: assignment.id,
            expires_in_secs: state.config.offer_window.as_secs(),
        },
    );
    state.metrics.offer("requested");

    info!(
        order_id = %slot.order.id,
        driver_id = %assignment.driver_id,
        radius_km,
        distance_km = candidate.distance_km,
        destination_match = candidate.destination_match,
        "offer sent to driver"
    );

    Some(DispatchOutcome::Offered {
        assignment_id: assignment.id,
        driver_id: assignment.driver_id,
        radius_km,
    })
}

fn finish_exhausted(state: &AppState, slot: &mut OrderSlot, started: Instant) {
    slot.searching = false;
    slot.last_search_ended = Some(state.now());
    state
        .metrics
        .search_finished("exhausted", started.elapsed().as_secs_f64());
    warn!(
        order_id = %slot.order.id,
        max_radius_km = state.config.max_search_radius_km,
        excluded = slot.excluded.len(),
        "no driver found in any radius; order stays pending"
    );
}
