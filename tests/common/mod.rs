#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Local, Utc};
use mockable::Clock;
use ride_dispatch::config::DispatchConfig;
use ride_dispatch::engine::orders::{create_order, CreatedOrder, NewLeg, NewOrder};
use ride_dispatch::geo::{offset_north, GeoPoint};
use ride_dispatch::models::order::OrderKind;
use ride_dispatch::state::AppState;
use uuid::Uuid;

/// Wall clock that only moves when a test says so.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(Utc::now()),
        })
    }

    pub fn advance_secs(&self, secs: i64) {
        let mut now = self.now.lock().unwrap();
        *now += Duration::seconds(secs);
    }
}

impl Clock for ManualClock {
    fn local(&self) -> DateTime<Local> {
        self.utc().with_timezone(&Local)
    }

    fn utc(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

pub struct Harness {
    pub state: Arc<AppState>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(DispatchConfig::default())
    }

    pub fn with_config(config: DispatchConfig) -> Self {
        let clock = ManualClock::new();
        let state = Arc::new(AppState::with_clock(config, 256, clock.clone()));
        Self { state, clock }
    }

    /// Reports a fresh location `km` north of the standard pickup.
    pub fn place_driver(&self, seed: u128, km: f64) -> Uuid {
        let id = Uuid::from_u128(seed);
        self.state
            .locator
            .update_location(id, offset_north(&pickup(), km), self.clock.utc(), self.clock.utc())
            .unwrap();
        id
    }

    pub async fn order_at(&self, from: GeoPoint, to: GeoPoint) -> CreatedOrder {
        create_order(
            &self.state,
            NewOrder {
                rider_id: Uuid::new_v4(),
                kind: OrderKind::Pickup,
                legs: vec![NewLeg {
                    pickup: from,
                    dropoff: to,
                    ride_category: None,
                    price: Some(42_000.0),
                }],
            },
        )
        .await
        .unwrap()
    }

    pub async fn order(&self) -> CreatedOrder {
        self.order_at(pickup(), dropoff()).await
    }
}

pub fn pickup() -> GeoPoint {
    GeoPoint::new(41.2995, 69.2401)
}

pub fn dropoff() -> GeoPoint {
    offset_north(&pickup(), 8.0)
}
