use std::sync::Arc;

use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::engine::matching::{reassign, DispatchOutcome};
use crate::error::AppError;
use crate::models::assignment::{Assignment, AssignmentStatus, OfferAction, OfferView};
use crate::models::notification::DispatchEvent;
use crate::models::order::OrderStatus;
use crate::state::AppState;

#[derive(Debug, Clone, Serialize)]
pub struct OfferResponse {
    pub assignment: Assignment,
    pub order_status: OrderStatus,
    /// Set when the response triggered a new search.
    pub next: Option<DispatchOutcome>,
}

/// Applies a driver's accept/reject to their outstanding offer.
pub async fn respond(
    state: &Arc<AppState>,
    order_id: Uuid,
    driver_id: Uuid,
    action: OfferAction,
) -> Result<OfferResponse, AppError> {
    let slot = state.order_slot(order_id)?;
    let mut guard = slot.lock().await;
    let slot = &mut *guard;
    let now = state.now();

    if action == OfferAction::Accept && !slot.order.is_pending() {
        return Err(AppError::Conflict(format!(
            "order {order_id} is {:?} and can no longer be accepted",
            slot.order.status
        )));
    }

    let trip_points = slot.order.pickup().zip(slot.order.final_destination());
    let offer = slot.requested_offer_mut(driver_id).ok_or_else(|| {
        AppError::NotFound(format!(
            "no outstanding offer of order {order_id} for driver {driver_id}"
        ))
    })?;

    match action {
        OfferAction::Accept => {
            // The driver may have confirmed another trip since this offer went out.
            if let Some((pickup, destination)) = trip_points {
                if !state
                    .locator
                    .claim_trip(driver_id, order_id, &pickup, destination)
                {
                    return Err(AppError::Conflict(format!(
                        "driver {driver_id} is on a trip that does not end near order {order_id}"
                    )));
                }
            }

            offer.resolve(AssignmentStatus::Accepted, now);
            let assignment = offer.clone();

            slot.order.status = OrderStatus::Confirmed;
            slot.order.driver_id = Some(driver_id);
            slot.searching = false;

            state.notifier.notify(
                slot.order.rider_id,
                DispatchEvent::DriverFound {
                    order_id,
                    order_code: slot.order.code.clone(),
                    driver_id,
                },
            );
            state.metrics.offer("accepted");
            state.metrics.orders_pending.dec();

            state.settle(slot);
            info!(order_id = %order_id, driver_id = %driver_id, "offer accepted; order confirmed");

            Ok(OfferResponse {
                assignment,
                order_status: slot.order.status,
                next: None,
            })
        }
        OfferAction::Reject => {
            offer.resolve(AssignmentStatus::Rejected, now);
            let assignment = offer.clone();
            state.metrics.offer("rejected");

            info!(order_id = %order_id, driver_id = %driver_id, "offer rejected");

            let next = if slot.order.is_pending() {
                Some(reassign(state, slot, driver_id))
            } else {
                // Cancelled while the offer was out: bookkeeping only.
                slot.excluded.insert(driver_id);
                state.settle(slot);
                None
            };

            Ok(OfferResponse {
                assignment,
                order_status: slot.order.status,
                next,
            })
        }
    }
}

/// Outstanding offers addressed to `driver_id` on orders still waiting for a
/// driver, oldest first.
pub async fn list_offers(state: &Arc<AppState>, driver_id: Uuid) -> Vec<OfferView> {
    let now = state.now();
    let window = state.config.offer_window_chrono();
    let mut offers = Vec::new();

    for slot in state.open_order_slots() {
        let guard = slot.lock().await;
        if !guard.order.is_pending() {
            continue;
        }
        let Some(pickup) = guard.order.pickup() else {
            continue;
        };

        for assignment in guard
            .assignments
            .iter()
            .filter(|a| a.is_requested() && a.driver_id == driver_id)
        {
            let remaining = window - (now - assignment.requested_at);
            offers.push(OfferView {
                assignment_id: assignment.id,
                order_id: guard.order.id,
                order_code: guard.order.code.clone(),
                pickup,
                distance_km: assignment.distance_km,
                requested_at: assignment.requested_at,
                remaining_secs: ((remaining.num_milliseconds() + 999) / 1000).max(0),
            });
        }
    }

    offers.sort_by_key(|offer| offer.requested_at);
    offers
}
