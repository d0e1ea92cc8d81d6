use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use crate::engine::matching::{dispatch, DispatchOutcome};
use crate::error::AppError;
use crate::geo::{haversine_km, GeoPoint};
use crate::models::assignment::Assignment;
use crate::models::driver::DriverLocation;
use crate::models::notification::DispatchEvent;
use crate::models::order::{CancelReason, Cancellation, Order, OrderKind, OrderLeg, OrderStatus};
use crate::state::{AppState, OrderSlot};

const DEFAULT_RIDE_CATEGORY: &str = "standard";

#[derive(Debug, Clone, Deserialize)]
pub struct NewLeg {
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    pub ride_category: Option<String>,
    /// Quoted by the pricing service; stored as-is.
    pub price: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewOrder {
    pub rider_id: Uuid,
    #[serde(default)]
    pub kind: OrderKind,
    pub legs: Vec<NewLeg>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedOrder {
    pub order: Order,
    pub dispatch: DispatchOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderDetails {
    pub order: Order,
    pub assignments: Vec<Assignment>,
    pub searching: bool,
}

pub async fn create_order(state: &Arc<AppState>, request: NewOrder) -> Result<CreatedOrder, AppError> {
    if request.legs.is_empty() {
        return Err(AppError::Validation("an order needs at least one leg".to_string()));
    }

    let last = request.legs.len() - 1;
    let legs = request
        .legs
        .into_iter()
        .enumerate()
        .map(|(index, leg)| build_leg(state, leg, index == last))
        .collect::<Result<Vec<_>, _>>()?;

    let order = Order {
        id: Uuid::new_v4(),
        code: state.next_order_code(),
        rider_id: request.rider_id,
        kind: request.kind,
        legs,
        status: OrderStatus::Pending,
        driver_id: None,
        cancellation: None,
        created_at: state.now(),
        completed_at: None,
    };

    state
        .orders
        .insert(order.id, Arc::new(Mutex::new(OrderSlot::new(order.clone()))));
    state.open_orders.insert(order.id);
    state.metrics.orders_pending.inc();

    info!(
        order_id = %order.id,
        order_code = %order.code,
        rider_id = %order.rider_id,
        legs = order.legs.len(),
        "order created"
    );

    let outcome = dispatch(state, order.id).await?;
    let order = state.order_slot(order.id)?.lock().await.order.clone();

    Ok(CreatedOrder {
        order,
        dispatch: outcome,
    })
}

fn build_leg(state: &AppState, leg: NewLeg, is_final_stop: bool) -> Result<OrderLeg, AppError> {
    leg.pickup.validate()?;
    leg.dropoff.validate()?;

    if let Some(price) = leg.price {
        if !price.is_finite() || price < 0.0 {
            return Err(AppError::Validation(format!("price must be >= 0, got {price}")));
        }
    }

    let ride_category = leg
        .ride_category
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| DEFAULT_RIDE_CATEGORY.to_string());

    let distance_km = haversine_km(&leg.pickup, &leg.dropoff);
    let eta_minutes = ((distance_km / state.config.average_speed_kmh) * 60.0)
        .ceil()
        .max(1.0) as u32;

    Ok(OrderLeg {
        pickup: leg.pickup,
        dropoff: leg.dropoff,
        is_final_stop,
        ride_category,
        distance_km: (distance_km * 100.0).round() / 100.0,
        eta_minutes,
        price: leg.price,
    })
}

pub async fn get_order(state: &Arc<AppState>, order_id: Uuid) -> Result<OrderDetails, AppError> {
    let slot = state.order_slot(order_id)?;
    let guard = slot.lock().await;

    Ok(OrderDetails {
        order: guard.order.clone(),
        assignments: guard.assignments.clone(),
        searching: guard.searching,
    })
}

/// Cancels a pending or confirmed order.
///
/// An outstanding offer stays on record but is dead: accepting it fails and
/// resolving it never dispatches again.
pub async fn cancel_order(
    state: &Arc<AppState>,
    order_id: Uuid,
    reason: CancelReason,
    other_reason: Option<String>,
) -> Result<Order, AppError> {
    let slot = state.order_slot(order_id)?;
    let mut guard = slot.lock().await;
    let slot = &mut *guard;

    let previous = slot.order.status;
    if !matches!(previous, OrderStatus::Pending | OrderStatus::Confirmed) {
        return Err(AppError::Conflict(format!(
            "order {order_id} is {previous:?} and cannot be cancelled"
        )));
    }

    let cancellation = Cancellation::new(reason, other_reason, state.now())?;
    slot.order.status = OrderStatus::Cancelled;
    slot.order.cancellation = Some(cancellation);
    slot.searching = false;

    match previous {
        OrderStatus::Pending => state.metrics.orders_pending.dec(),
        _ => {
            if let Some(driver_id) = slot.order.driver_id {
                state.locator.mark_free(driver_id, order_id);
                state.notifier.notify(
                    driver_id,
                    DispatchEvent::OrderCancelled {
                        order_id,
                        order_code: slot.order.code.clone(),
                    },
                );
            }
        }
    }

    state.settle(slot);

    info!(
        order_id = %order_id,
        previous = ?previous,
        reason = ?reason,
        outstanding_offer = slot.active_offer().is_some(),
        "order cancelled"
    );

    Ok(slot.order.clone())
}

/// Trip-completion hook; only a confirmed order can complete.
pub async fn complete_order(state: &Arc<AppState>, order_id: Uuid) -> Result<Order, AppError> {
    let slot = state.order_slot(order_id)?;
    let mut guard = slot.lock().await;
    let slot = &mut *guard;

    if slot.order.status != OrderStatus::Confirmed {
        return Err(AppError::Conflict(format!(
            "order {order_id} is {:?}, only confirmed orders can complete",
            slot.order.status
        )));
    }

    slot.order.status = OrderStatus::Completed;
    slot.order.completed_at = Some(state.now());

    if let Some(driver_id) = slot.order.driver_id {
        state.locator.mark_free(driver_id, order_id);
    }
    state.notifier.notify(
        slot.order.rider_id,
        DispatchEvent::OrderCompleted {
            order_id,
            order_code: slot.order.code.clone(),
        },
    );

    info!(order_id = %order_id, driver_id = ?slot.order.driver_id, "order completed");

    Ok(slot.order.clone())
}

pub async fn driver_location_for_order(
    state: &Arc<AppState>,
    order_id: Uuid,
) -> Result<DriverLocation, AppError> {
    let slot = state.order_slot(order_id)?;
    let driver_id = {
        let guard = slot.lock().await;
        match (guard.order.status, guard.order.driver_id) {
            (OrderStatus::Confirmed, Some(driver_id)) => driver_id,
            (status, _) => {
                return Err(AppError::Conflict(format!(
                    "order {order_id} is {status:?}; driver location is only shared while confirmed"
                )));
            }
        }
    };

    state
        .locator
        .get(driver_id)
        .and_then(|driver| driver.location)
        .ok_or_else(|| AppError::NotFound(format!("driver {driver_id} has not reported a location")))
}
