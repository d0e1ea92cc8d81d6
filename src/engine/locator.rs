use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::error::AppError;
use crate::geo::{distance_km, GeoPoint};
use crate::models::driver::{ActiveTrip, DriverLocation, DriverState};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub driver_id: Uuid,
    pub distance_km: f64,
    pub destination_match: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationUpdate {
    Applied,
    Ignored,
}

/// How far ahead of the server clock a device timestamp may run.
const MAX_FUTURE_SKEW_SECS: i64 = 30;

/// Last known position, availability and confirmed trips of every driver.
pub struct DriverLocator {
    drivers: DashMap<Uuid, DriverState>,
    freshness: Duration,
    destination_radius_km: f64,
}

impl DriverLocator {
    pub fn new(freshness: Duration, destination_radius_km: f64) -> Self {
        Self {
            drivers: DashMap::new(),
            freshness,
            destination_radius_km,
        }
    }

    /// Stores the position iff `at` is strictly newer than what is on record.
    /// The first report registers the driver as online. Timestamps more than
    /// a few seconds past `now` are refused.
    pub fn update_location(
        &self,
        driver_id: Uuid,
        point: GeoPoint,
        at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(LocationUpdate, DriverState), AppError> {
        point.validate()?;
        if at > now + Duration::seconds(MAX_FUTURE_SKEW_SECS) {
            return Err(AppError::Validation(format!(
                "location timestamp {at} is ahead of server time {now}"
            )));
        }

        let mut driver = self
            .drivers
            .entry(driver_id)
            .or_insert_with(|| DriverState::new(driver_id));

        let is_newer = driver
            .location
            .as_ref()
            .is_none_or(|current| at > current.updated_at);

        if !is_newer {
            warn!(driver_id = %driver_id, at = %at, "stale location update ignored");
            return Ok((LocationUpdate::Ignored, driver.clone()));
        }

        driver.location = Some(DriverLocation {
            point,
            updated_at: at,
        });
        Ok((LocationUpdate::Applied, driver.clone()))
    }

    pub fn set_availability(
        &self,
        driver_id: Uuid,
        online: bool,
        max_pickup_km: Option<f64>,
    ) -> Result<DriverState, AppError> {
        if let Some(km) = max_pickup_km {
            if !km.is_finite() || km <= 0.0 {
                return Err(AppError::Validation(format!(
                    "max_pickup_km must be > 0, got {km}"
                )));
            }
        }

        let mut driver = self
            .drivers
            .entry(driver_id)
            .or_insert_with(|| DriverState::new(driver_id));
        driver.online = online;
        driver.max_pickup_km = max_pickup_km;
        Ok(driver.clone())
    }

    /// Drops `order_id` from the driver's trips; any other confirmed trip
    /// keeps the driver busy.
    pub fn mark_free(&self, driver_id: Uuid, order_id: Uuid) {
        if let Some(mut driver) = self.drivers.get_mut(&driver_id) {
            driver.active_trips.retain(|trip| trip.order_id != order_id);
        }
    }

    /// Queues `order_id` on the driver if they can still take `pickup`: free,
    /// or finishing the current trip within the destination radius. Check and
    /// insert happen under the driver's entry lock.
    pub fn claim_trip(
        &self,
        driver_id: Uuid,
        order_id: Uuid,
        pickup: &GeoPoint,
        destination: GeoPoint,
    ) -> bool {
        let mut driver = self
            .drivers
            .entry(driver_id)
            .or_insert_with(|| DriverState::new(driver_id));
        if !driver.is_free() && self.destination_match(&driver, pickup).is_none() {
            return false;
        }
        if !driver.active_trips.iter().any(|trip| trip.order_id == order_id) {
            driver.active_trips.push(ActiveTrip {
                order_id,
                destination,
            });
        }
        true
    }

    fn destination_match(&self, driver: &DriverState, pickup: &GeoPoint) -> Option<f64> {
        let trip = driver.current_trip()?;
        let distance = distance_km(&trip.destination, pickup);
        (distance < self.destination_radius_km).then_some(distance)
    }

    pub fn get(&self, driver_id: Uuid) -> Option<DriverState> {
        self.drivers.get(&driver_id).map(|entry| entry.value().clone())
    }

    pub fn list(&self) -> Vec<DriverState> {
        self.drivers
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    /// Drivers eligible for a pickup at `radius_km`, best first.
    ///
    /// Free drivers with a fresh position inside the radius (and inside their
    /// own pickup preference) come first, nearest first. Busy drivers whose
    /// trip ends strictly within the destination radius of the pickup follow,
    /// nearest destination first.
    pub fn query_candidates(
        &self,
        pickup: &GeoPoint,
        radius_km: f64,
        exclude: &HashSet<Uuid>,
        now: DateTime<Utc>,
    ) -> Vec<Candidate> {
        let fresh_after = now - self.freshness;

        let mut free = Vec::new();
        let mut busy = Vec::new();

        for entry in self.drivers.iter() {
            let driver = entry.value();
            if !driver.online || exclude.contains(&driver.id) {
                continue;
            }

            if !driver.is_free() {
                if let Some(distance) = self.destination_match(driver, pickup) {
                    busy.push(Candidate {
                        driver_id: driver.id,
                        distance_km: distance,
                        destination_match: true,
                    });
                }
                continue;
            }

            let Some(location) = &driver.location else {
                continue;
            };
            if location.updated_at < fresh_after {
                continue;
            }

            let reach = driver
                .max_pickup_km
                .map_or(radius_km, |pref| pref.min(radius_km));
            let distance = distance_km(&location.point, pickup);
            if distance <= reach {
                free.push(Candidate {
                    driver_id: driver.id,
                    distance_km: distance,
                    destination_match: false,
                });
            }
        }

        free.sort_by(by_distance);
        busy.sort_by(by_distance);
        free.extend(busy);
        free
    }
}

fn by_distance(a: &Candidate, b: &Candidate) -> Ordering {
    a.distance_km
        .total_cmp(&b.distance_km)
        .then_with(|| a.driver_id.cmp(&b.driver_id))
}
