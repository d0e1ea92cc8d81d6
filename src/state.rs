use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use mockable::{Clock, DefaultClock};
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

use crate::config::DispatchConfig;
use crate::engine::locator::DriverLocator;
use crate::error::AppError;
use crate::models::assignment::Assignment;
use crate::models::notification::Notification;
use crate::models::order::Order;
use crate::notify::{BroadcastNotifier, Notifier};
use crate::observability::metrics::Metrics;

pub type SharedClock = Arc<dyn Clock + Send + Sync>;

/// Everything owned by one order. Guarded by a per-order mutex; every
/// transition of the order or its offers happens while holding it.
#[derive(Debug)]
pub struct OrderSlot {
    pub order: Order,
    pub assignments: Vec<Assignment>,
    pub excluded: HashSet<Uuid>,
    pub searching: bool,
    pub last_search_ended: Option<DateTime<Utc>>,
}

impl OrderSlot {
    pub fn new(order: Order) -> Self {
        Self {
            order,
            assignments: Vec::new(),
            excluded: HashSet::new(),
            searching: false,
            last_search_ended: None,
        }
    }

    pub fn active_offer(&self) -> Option<&Assignment> {
        self.assignments.iter().find(|a| a.is_requested())
    }

    /// Nothing left for the sweeper or a driver to act on.
    pub fn is_settled(&self) -> bool {
        !self.order.is_pending() && self.active_offer().is_none()
    }

    pub fn requested_offer_mut(&mut self, driver_id: Uuid) -> Option<&mut Assignment> {
        self.assignments
            .iter_mut()
            .find(|a| a.is_requested() && a.driver_id == driver_id)
    }
}

pub struct AppState {
    pub config: DispatchConfig,
    pub orders: DashMap<Uuid, Arc<Mutex<OrderSlot>>>,
    /// Orders that are pending or still carry a requested offer.
    pub open_orders: DashSet<Uuid>,
    pub locator: DriverLocator,
    pub events_tx: broadcast::Sender<Notification>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: SharedClock,
    pub metrics: Metrics,
    order_seq: AtomicU64,
}

impl AppState {
    pub fn new(config: DispatchConfig, event_buffer_size: usize) -> Self {
        Self::with_clock(config, event_buffer_size, Arc::new(DefaultClock))
    }

    pub fn with_clock(config: DispatchConfig, event_buffer_size: usize, clock: SharedClock) -> Self {
        let (events_tx, _unused_rx) = broadcast::channel(event_buffer_size);
        let notifier: Arc<dyn Notifier> = BroadcastNotifier::new(events_tx.clone(), clock.clone());
        let locator = DriverLocator::new(
            config.location_freshness_chrono(),
            config.destination_match_radius_km,
        );

        Self {
            config,
            orders: DashMap::new(),
            open_orders: DashSet::new(),
            locator,
            events_tx,
            notifier,
            clock,
            metrics: Metrics::new(),
            order_seq: AtomicU64::new(0),
        }
    }

    /// Replaces the default broadcast delivery, e.g. with a push gateway.
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.utc()
    }

    pub fn next_order_code(&self) -> String {
        let sequence = self.order_seq.fetch_add(1, Ordering::Relaxed) + 1;
        Order::code_for(sequence)
    }

    /// Clones the slot handle out of the map so no shard lock is held while
    /// the caller awaits the order mutex.
    pub fn order_slot(&self, order_id: Uuid) -> Result<Arc<Mutex<OrderSlot>>, AppError> {
        self.orders
            .get(&order_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AppError::order_not_found(order_id))
    }

    /// Slots of every open order. Ids are collected first so no index guard
    /// is held while the orders map is read.
    pub fn open_order_slots(&self) -> Vec<Arc<Mutex<OrderSlot>>> {
        let ids: Vec<Uuid> = self.open_orders.iter().map(|id| *id).collect();
        ids.iter()
            .filter_map(|id| self.orders.get(id).map(|entry| entry.value().clone()))
            .collect()
    }

    /// Drops the order from the open index once it is settled. Called with
    /// the order lock held.
    pub fn settle(&self, slot: &OrderSlot) {
        if slot.is_settled() {
            self.open_orders.remove(&slot.order.id);
        }
    }
}
