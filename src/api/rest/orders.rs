use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use uuid::Uuid;

use crate::engine::matching::{retry_dispatch, DispatchOutcome};
use crate::engine::orders::{self, CreatedOrder, NewOrder, OrderDetails};
use crate::error::AppError;
use crate::models::driver::DriverLocation;
use crate::models::order::{CancelReason, Order};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(create_order))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/cancel", post(cancel_order))
        .route("/orders/:id/complete", post(complete_order))
        .route("/orders/:id/retry", post(retry_order))
        .route("/orders/:id/driver-location", get(driver_location))
}

#[derive(Deserialize)]
pub struct CancelOrderRequest {
    pub reason: CancelReason,
    pub other_reason: Option<String>,
}

async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<NewOrder>,
) -> Result<Json<CreatedOrder>, AppError> {
    orders::create_order(&state, payload).await.map(Json)
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<OrderDetails>, AppError> {
    orders::get_order(&state, id).await.map(Json)
}

async fn cancel_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CancelOrderRequest>,
) -> Result<Json<Order>, AppError> {
    orders::cancel_order(&state, id, payload.reason, payload.other_reason)
        .await
        .map(Json)
}

async fn complete_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Order>, AppError> {
    orders::complete_order(&state, id).await.map(Json)
}

async fn retry_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DispatchOutcome>, AppError> {
    retry_dispatch(&state, id).await.map(Json)
}

async fn driver_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DriverLocation>, AppError> {
    orders::driver_location_for_order(&state, id).await.map(Json)
}
