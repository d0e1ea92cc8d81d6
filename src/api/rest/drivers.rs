use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, patch, post, put};
use axum::Json;
use axum::Router;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::assignment::{list_offers, respond, OfferResponse};
use crate::engine::locator::LocationUpdate;
use crate::error::AppError;
use crate::geo::GeoPoint;
use crate::models::assignment::{OfferAction, OfferView};
use crate::models::driver::DriverState;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/drivers", get(list_drivers))
        .route("/drivers/:id", get(get_driver))
        .route("/drivers/:id/location", put(update_location))
        .route("/drivers/:id/availability", patch(update_availability))
        .route("/drivers/:id/offers", get(driver_offers))
        .route("/drivers/:id/offers/:order_id", post(respond_to_offer))
}

#[derive(Deserialize)]
pub struct UpdateLocationRequest {
    pub lat: f64,
    pub lng: f64,
    /// Device timestamp; defaults to the time the update is received.
    pub at: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
pub struct UpdateLocationResponse {
    pub result: LocationUpdate,
    pub driver: DriverState,
}

#[derive(Deserialize)]
pub struct UpdateAvailabilityRequest {
    pub online: bool,
    pub max_pickup_km: Option<f64>,
}

#[derive(Deserialize)]
pub struct RespondRequest {
    pub action: OfferAction,
}

async fn list_drivers(State(state): State<Arc<AppState>>) -> Json<Vec<DriverState>> {
    Json(state.locator.list())
}

async fn get_driver(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DriverState>, AppError> {
    state
        .locator
        .get(id)
        .map(Json)
        .ok_or_else(|| AppError::driver_not_found(id))
}

async fn update_location(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateLocationRequest>,
) -> Result<Json<UpdateLocationResponse>, AppError> {
    let now = state.now();
    let at = payload.at.unwrap_or(now);
    let (result, driver) =
        state
            .locator
            .update_location(id, GeoPoint::new(payload.lat, payload.lng), at, now)?;

    Ok(Json(UpdateLocationResponse { result, driver }))
}

async fn update_availability(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateAvailabilityRequest>,
) -> Result<Json<DriverState>, AppError> {
    state
        .locator
        .set_availability(id, payload.online, payload.max_pickup_km)
        .map(Json)
}

async fn driver_offers(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Json<Vec<OfferView>> {
    Json(list_offers(&state, id).await)
}

async fn respond_to_offer(
    State(state): State<Arc<AppState>>,
    Path((id, order_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<RespondRequest>,
) -> Result<Json<OfferResponse>, AppError> {
    respond(&state, order_id, id, payload.action).await.map(Json)
}
