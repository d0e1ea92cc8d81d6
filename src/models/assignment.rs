use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::GeoPoint;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Requested,
    Accepted,
    Rejected,
    Timeout,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OfferAction {
    Accept,
    Reject,
}

/// One offer of one order to one driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub id: Uuid,
    pub order_id: Uuid,
    pub driver_id: Uuid,
    pub status: AssignmentStatus,
    pub radius_km: f64,
    pub distance_km: f64,
    pub destination_match: bool,
    pub requested_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
}

impl Assignment {
    pub fn is_requested(&self) -> bool {
        self.status == AssignmentStatus::Requested
    }

    /// Moves a requested offer to `status`. Returns false if the row was
    /// already resolved, leaving it untouched.
    pub fn resolve(&mut self, status: AssignmentStatus, at: DateTime<Utc>) -> bool {
        if !self.is_requested() || status == AssignmentStatus::Requested {
            return false;
        }
        self.status = status;
        self.responded_at = Some(at);
        true
    }
}

/// A requested offer as shown to the driver it is addressed to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferView {
    pub assignment_id: Uuid,
    pub order_id: Uuid,
    pub order_code: String,
    pub pickup: GeoPoint,
    pub distance_km: f64,
    pub requested_at: DateTime<Utc>,
    pub remaining_secs: i64,
}
