use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DispatchEvent {
    OfferCreated {
        order_id: Uuid,
        order_code: String,
        assignment_id: Uuid,
        expires_in_secs: u64,
    },
    DriverFound {
        order_id: Uuid,
        order_code: String,
        driver_id: Uuid,
    },
    OrderCancelled {
        order_id: Uuid,
        order_code: String,
    },
    OrderCompleted {
        order_id: Uuid,
        order_code: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub recipient: Uuid,
    pub event: DispatchEvent,
    pub sent_at: DateTime<Utc>,
}
