use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::GeoPoint;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverLocation {
    pub point: GeoPoint,
    pub updated_at: DateTime<Utc>,
}

/// A confirmed trip the driver is on or has queued behind the current one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveTrip {
    pub order_id: Uuid,
    pub destination: GeoPoint,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverState {
    pub id: Uuid,
    pub online: bool,
    pub max_pickup_km: Option<f64>,
    pub location: Option<DriverLocation>,
    /// Confirmed trips, oldest first.
    pub active_trips: Vec<ActiveTrip>,
}

impl DriverState {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            online: true,
            max_pickup_km: None,
            location: None,
            active_trips: Vec::new(),
        }
    }

    pub fn is_free(&self) -> bool {
        self.active_trips.is_empty()
    }

    /// The trip being driven right now; its dropoff is where the driver
    /// becomes available next.
    pub fn current_trip(&self) -> Option<&ActiveTrip> {
        self.active_trips.first()
    }
}
