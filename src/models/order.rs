use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::geo::GeoPoint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    #[default]
    Pickup,
    ForMe,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    ChangeInPlans,
    WaitingForLongTime,
    DriverDeniedToGoToDestination,
    DriverDeniedToComeToPickup,
    WrongAddressShown,
    ThePriceIsNotReasonable,
    EmergencySituation,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cancellation {
    pub reason: CancelReason,
    pub other_reason: Option<String>,
    pub cancelled_at: DateTime<Utc>,
}

impl Cancellation {
    /// Free text is mandatory for `Other` and dropped for every other reason.
    pub fn new(
        reason: CancelReason,
        other_reason: Option<String>,
        cancelled_at: DateTime<Utc>,
    ) -> Result<Self, AppError> {
        let text = other_reason
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty());

        let other_reason = match (reason, text) {
            (CancelReason::Other, None) => {
                return Err(AppError::Validation(
                    "other_reason is required when reason is other".to_string(),
                ));
            }
            (CancelReason::Other, Some(text)) => Some(text),
            (_, _) => None,
        };

        Ok(Self {
            reason,
            other_reason,
            cancelled_at,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderLeg {
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    pub is_final_stop: bool,
    pub ride_category: String,
    pub distance_km: f64,
    pub eta_minutes: u32,
    pub price: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub code: String,
    pub rider_id: Uuid,
    pub kind: OrderKind,
    pub legs: Vec<OrderLeg>,
    pub status: OrderStatus,
    pub driver_id: Option<Uuid>,
    pub cancellation: Option<Cancellation>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn code_for(sequence: u64) -> String {
        format!("ORD-{sequence:06}")
    }

    /// Pickup of the first leg; where every candidate search is centred.
    pub fn pickup(&self) -> Option<GeoPoint> {
        self.legs.first().map(|leg| leg.pickup)
    }

    /// Dropoff of the final-stop leg, used for destination matching once a
    /// driver is on this trip.
    pub fn final_destination(&self) -> Option<GeoPoint> {
        self.legs
            .iter()
            .find(|leg| leg.is_final_stop)
            .or_else(|| self.legs.last())
            .map(|leg| leg.dropoff)
    }

    pub fn is_pending(&self) -> bool {
        self.status == OrderStatus::Pending
    }
}
