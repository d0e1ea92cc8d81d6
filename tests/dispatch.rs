mod common;

use std::sync::Arc;

use common::{dropoff, pickup, Harness};
use ride_dispatch::config::DispatchConfig;
use ride_dispatch::engine::assignment::{list_offers, respond};
use ride_dispatch::engine::matching::DispatchOutcome;
use ride_dispatch::engine::orders::{cancel_order, complete_order, driver_location_for_order, get_order};
use ride_dispatch::engine::sweeper::{run_sweeper, sweep_once, SweepReport};
use ride_dispatch::error::AppError;
use ride_dispatch::geo::offset_north;
use ride_dispatch::models::assignment::{AssignmentStatus, OfferAction};
use ride_dispatch::models::notification::DispatchEvent;
use ride_dispatch::models::order::{CancelReason, OrderStatus};
use tokio::time::{sleep, Duration};
use uuid::Uuid;

fn single_tier() -> DispatchConfig {
    DispatchConfig {
        max_search_radius_km: 5.0,
        ..DispatchConfig::default()
    }
}

fn offered_driver(outcome: &DispatchOutcome) -> Uuid {
    match outcome {
        DispatchOutcome::Offered { driver_id, .. } => *driver_id,
        other => panic!("expected an offer, got {other:?}"),
    }
}

async fn requested_count(harness: &Harness, order_id: Uuid) -> usize {
    get_order(&harness.state, order_id)
        .await
        .unwrap()
        .assignments
        .iter()
        .filter(|a| a.status == AssignmentStatus::Requested)
        .count()
}

#[tokio::test]
async fn nearest_free_driver_gets_an_immediate_offer() {
    let harness = Harness::new();
    let near = harness.place_driver(1, 2.35);
    let _far = harness.place_driver(2, 4.0);
    let mut events = harness.state.events_tx.subscribe();

    let created = harness.order().await;

    assert_eq!(offered_driver(&created.dispatch), near);
    assert_eq!(created.order.status, OrderStatus::Pending);

    let details = get_order(&harness.state, created.order.id).await.unwrap();
    assert_eq!(details.assignments.len(), 1);
    let offer = &details.assignments[0];
    assert_eq!(offer.status, AssignmentStatus::Requested);
    assert_eq!(offer.radius_km, 5.0);
    assert!((offer.distance_km - 2.35).abs() < 1e-6);
    assert!(!details.searching);

    let notification = events.try_recv().unwrap();
    assert_eq!(notification.recipient, near);
    assert!(matches!(
        notification.event,
        DispatchEvent::OfferCreated { expires_in_secs: 25, .. }
    ));
}

#[tokio::test]
async fn rejection_moves_the_offer_to_the_next_driver() {
    let harness = Harness::new();
    let near = harness.place_driver(1, 1.0);
    let next = harness.place_driver(2, 3.0);
    let order_id = harness.order().await.order.id;

    harness.clock.advance_secs(15);
    let response = respond(&harness.state, order_id, near, OfferAction::Reject)
        .await
        .unwrap();

    assert_eq!(response.assignment.status, AssignmentStatus::Rejected);
    assert_eq!(
        response.assignment.responded_at,
        Some(response.assignment.requested_at + chrono::Duration::seconds(15))
    );
    assert_eq!(offered_driver(response.next.as_ref().unwrap()), next);

    assert!(list_offers(&harness.state, near).await.is_empty());
    assert_eq!(list_offers(&harness.state, next).await.len(), 1);
    assert_eq!(requested_count(&harness, order_id).await, 1);

    // The rejecting driver's stale response is no longer valid.
    let stale = respond(&harness.state, order_id, near, OfferAction::Accept).await;
    assert!(matches!(stale, Err(AppError::NotFound(_))));
}

#[tokio::test]
async fn unanswered_offer_times_out_and_moves_on() {
    let harness = Harness::new();
    let near = harness.place_driver(1, 1.0);
    let next = harness.place_driver(2, 3.0);
    let order_id = harness.order().await.order.id;

    harness.clock.advance_secs(20);
    assert_eq!(list_offers(&harness.state, near).await[0].remaining_secs, 5);
    assert_eq!(sweep_once(&harness.state).await, SweepReport::default());

    harness.clock.advance_secs(5);
    let report = sweep_once(&harness.state).await;
    assert_eq!(report.timeouts, 1);
    assert_eq!(report.reassigned, 1);

    let details = get_order(&harness.state, order_id).await.unwrap();
    assert_eq!(details.assignments[0].driver_id, near);
    assert_eq!(details.assignments[0].status, AssignmentStatus::Timeout);
    assert_eq!(details.assignments[1].driver_id, next);
    assert_eq!(details.assignments[1].status, AssignmentStatus::Requested);

    assert!(list_offers(&harness.state, near).await.is_empty());
    let offers = list_offers(&harness.state, next).await;
    assert_eq!(offers.len(), 1);
    assert_eq!(offers[0].remaining_secs, 25);

    // Sweeping again changes nothing.
    let again = sweep_once(&harness.state).await;
    assert_eq!(again.timeouts, 0);
    assert_eq!(requested_count(&harness, order_id).await, 1);
}

#[tokio::test(start_paused = true)]
async fn no_driver_within_max_radius_leaves_order_pending() {
    let harness = Harness::new();
    harness.place_driver(1, 25.0);

    let created = harness.order().await;
    assert_eq!(
        created.dispatch,
        DispatchOutcome::Searching {
            next_radius_km: 10.0
        }
    );

    sleep(Duration::from_secs(31)).await;

    let details = get_order(&harness.state, created.order.id).await.unwrap();
    assert_eq!(details.order.status, OrderStatus::Pending);
    assert!(details.assignments.is_empty());
    assert!(!details.searching);
    assert_eq!(
        harness
            .state
            .metrics
            .dispatch_searches_total
            .with_label_values(&["exhausted"])
            .get(),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn search_widens_until_a_driver_is_in_range() {
    let harness = Harness::new();
    let far = harness.place_driver(1, 12.0);

    let order_id = harness.order().await.order.id;

    sleep(Duration::from_secs(11)).await;
    assert!(get_order(&harness.state, order_id).await.unwrap().assignments.is_empty());

    sleep(Duration::from_secs(10)).await;
    let details = get_order(&harness.state, order_id).await.unwrap();
    assert_eq!(details.assignments.len(), 1);
    assert_eq!(details.assignments[0].driver_id, far);
    assert_eq!(details.assignments[0].radius_km, 15.0);
    assert!(!details.searching);
}

#[tokio::test(start_paused = true)]
async fn only_one_search_runs_per_order() {
    let harness = Harness::new();
    let order_id = harness.order().await.order.id;

    let again = ride_dispatch::engine::matching::dispatch(&harness.state, order_id)
        .await
        .unwrap();
    assert_eq!(
        again,
        DispatchOutcome::Skipped {
            reason: "search already in flight"
        }
    );

    let driver = harness.place_driver(1, 3.0);
    sleep(Duration::from_secs(11)).await;

    let details = get_order(&harness.state, order_id).await.unwrap();
    assert_eq!(details.assignments.len(), 1);
    assert_eq!(details.assignments[0].driver_id, driver);
}

#[tokio::test]
async fn cancelled_order_cannot_be_accepted() {
    let harness = Harness::new();
    let near = harness.place_driver(1, 1.0);
    let _other = harness.place_driver(2, 2.0);
    let order_id = harness.order().await.order.id;

    let cancelled = cancel_order(&harness.state, order_id, CancelReason::ChangeInPlans, None)
        .await
        .unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);

    let accept = respond(&harness.state, order_id, near, OfferAction::Accept).await;
    assert!(matches!(accept, Err(AppError::Conflict(_))));
    assert!(list_offers(&harness.state, near).await.is_empty());

    let reject = respond(&harness.state, order_id, near, OfferAction::Reject)
        .await
        .unwrap();
    assert_eq!(reject.assignment.status, AssignmentStatus::Rejected);
    assert!(reject.next.is_none());

    harness.clock.advance_secs(60);
    sweep_once(&harness.state).await;

    let details = get_order(&harness.state, order_id).await.unwrap();
    assert_eq!(details.assignments.len(), 1);
    assert_eq!(details.order.status, OrderStatus::Cancelled);
}

#[tokio::test]
async fn expired_offer_on_cancelled_order_is_closed_without_redispatch() {
    let harness = Harness::new();
    harness.place_driver(1, 1.0);
    harness.place_driver(2, 2.0);
    let order_id = harness.order().await.order.id;

    cancel_order(
        &harness.state,
        order_id,
        CancelReason::Other,
        Some("found another ride".to_string()),
    )
    .await
    .unwrap();

    harness.clock.advance_secs(25);
    let report = sweep_once(&harness.state).await;
    assert_eq!(report.timeouts, 1);
    assert_eq!(report.reassigned, 0);

    let details = get_order(&harness.state, order_id).await.unwrap();
    assert_eq!(details.assignments.len(), 1);
    assert_eq!(details.assignments[0].status, AssignmentStatus::Timeout);
}

#[tokio::test(start_paused = true)]
async fn cancel_during_search_stops_it() {
    let harness = Harness::new();
    let order_id = harness.order().await.order.id;

    cancel_order(&harness.state, order_id, CancelReason::WaitingForLongTime, None)
        .await
        .unwrap();
    harness.place_driver(1, 2.0);

    sleep(Duration::from_secs(31)).await;

    let details = get_order(&harness.state, order_id).await.unwrap();
    assert!(details.assignments.is_empty());
    assert!(!details.searching);
    assert_eq!(
        harness
            .state
            .metrics
            .dispatch_searches_total
            .with_label_values(&["abandoned"])
            .get(),
        1
    );
}

#[tokio::test]
async fn other_reason_requires_text() {
    let harness = Harness::new();
    let order_id = harness.order().await.order.id;

    let result = cancel_order(&harness.state, order_id, CancelReason::Other, None).await;
    assert!(matches!(result, Err(AppError::Validation(_))));
    assert_eq!(
        get_order(&harness.state, order_id).await.unwrap().order.status,
        OrderStatus::Pending
    );
}

#[tokio::test]
async fn excluded_drivers_are_never_offered_again() {
    let harness = Harness::with_config(single_tier());
    let drivers = [
        harness.place_driver(1, 1.0),
        harness.place_driver(2, 2.0),
        harness.place_driver(3, 3.0),
    ];
    let created = harness.order().await;
    let order_id = created.order.id;

    let mut offered = vec![offered_driver(&created.dispatch)];
    loop {
        let current = *offered.last().unwrap();
        let response = respond(&harness.state, order_id, current, OfferAction::Reject)
            .await
            .unwrap();
        match response.next.unwrap() {
            DispatchOutcome::Offered { driver_id, .. } => {
                assert!(!offered.contains(&driver_id));
                offered.push(driver_id);
            }
            DispatchOutcome::Exhausted => break,
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    assert_eq!(offered, drivers.to_vec());
    assert_eq!(requested_count(&harness, order_id).await, 0);

    // A retry still skips everyone who already declined.
    let retried = ride_dispatch::engine::matching::retry_dispatch(&harness.state, order_id)
        .await
        .unwrap();
    assert_eq!(retried, DispatchOutcome::Exhausted);
}

#[tokio::test]
async fn acceptance_confirms_the_order_once() {
    let harness = Harness::new();
    let driver = harness.place_driver(1, 1.0);
    let created = harness.order().await;
    let order_id = created.order.id;
    let rider_id = created.order.rider_id;
    let mut events = harness.state.events_tx.subscribe();

    let accepted = respond(&harness.state, order_id, driver, OfferAction::Accept)
        .await
        .unwrap();
    assert_eq!(accepted.assignment.status, AssignmentStatus::Accepted);
    assert_eq!(accepted.order_status, OrderStatus::Confirmed);

    let notification = events.try_recv().unwrap();
    assert_eq!(notification.recipient, rider_id);
    assert!(matches!(notification.event, DispatchEvent::DriverFound { .. }));

    let twice = respond(&harness.state, order_id, driver, OfferAction::Accept).await;
    assert!(matches!(twice, Err(AppError::Conflict(_))));

    harness.clock.advance_secs(60);
    assert_eq!(sweep_once(&harness.state).await, SweepReport::default());

    let details = get_order(&harness.state, order_id).await.unwrap();
    assert_eq!(details.order.driver_id, Some(driver));
    assert_eq!(details.assignments.len(), 1);

    let location = driver_location_for_order(&harness.state, order_id)
        .await
        .unwrap();
    assert_eq!(location.point, offset_north(&pickup(), 1.0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_accepts_confirm_exactly_once() {
    let harness = Harness::new();
    let offered = harness.place_driver(1, 1.0);
    let other = harness.place_driver(2, 2.0);
    let order_id = harness.order().await.order.id;

    let mut handles = Vec::new();
    for attempt in 0..16 {
        let state = Arc::clone(&harness.state);
        let driver = if attempt % 2 == 0 { offered } else { other };
        handles.push(tokio::spawn(async move {
            respond(&state, order_id, driver, OfferAction::Accept).await
        }));
    }

    let mut successes = 0;
    for handle in handles {
        if handle.await.unwrap().is_ok() {
            successes += 1;
        }
    }
    assert_eq!(successes, 1);

    let details = get_order(&harness.state, order_id).await.unwrap();
    assert_eq!(details.order.status, OrderStatus::Confirmed);
    assert_eq!(details.order.driver_id, Some(offered));
    let accepted = details
        .assignments
        .iter()
        .filter(|a| a.status == AssignmentStatus::Accepted)
        .count();
    assert_eq!(accepted, 1);
    assert_eq!(harness.state.metrics.orders_pending.get(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sweep_and_rejection_racing_leave_one_offer() {
    let harness = Harness::new();
    for seed in 1..=12 {
        harness.place_driver(seed, seed as f64 * 0.3);
    }
    let order_id = harness.order().await.order.id;

    for _ in 0..4 {
        let current = get_order(&harness.state, order_id)
            .await
            .unwrap()
            .assignments
            .iter()
            .find(|a| a.status == AssignmentStatus::Requested)
            .map(|a| a.driver_id)
            .unwrap();

        harness.clock.advance_secs(25);
        let sweep_state = Arc::clone(&harness.state);
        let reject_state = Arc::clone(&harness.state);
        let (report, rejection) = tokio::join!(
            tokio::spawn(async move { sweep_once(&sweep_state).await }),
            tokio::spawn(async move {
                respond(&reject_state, order_id, current, OfferAction::Reject).await
            }),
        );
        let report = report.unwrap();
        let rejection = rejection.unwrap();

        // Exactly one of the two resolved the offer.
        assert_eq!(report.timeouts + usize::from(rejection.is_ok()), 1);
        assert_eq!(requested_count(&harness, order_id).await, 1);
    }

    let details = get_order(&harness.state, order_id).await.unwrap();
    let mut seen: Vec<_> = details.assignments.iter().map(|a| a.driver_id).collect();
    let total = seen.len();
    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), total);
}

#[tokio::test]
async fn driver_finishing_a_trip_nearby_is_offered_the_next_order() {
    let harness = Harness::new();
    let driver = harness.place_driver(1, 0.5);

    let first = harness.order().await;
    respond(&harness.state, first.order.id, driver, OfferAction::Accept)
        .await
        .unwrap();

    let just_outside = harness
        .order_at(offset_north(&dropoff(), 3.0), offset_north(&dropoff(), 10.0))
        .await;
    assert!(matches!(just_outside.dispatch, DispatchOutcome::Searching { .. }));

    let inside = harness
        .order_at(offset_north(&dropoff(), 2.999), offset_north(&dropoff(), 10.0))
        .await;
    assert_eq!(offered_driver(&inside.dispatch), driver);
    let details = get_order(&harness.state, inside.order.id).await.unwrap();
    assert!(details.assignments[0].destination_match);

    complete_order(&harness.state, first.order.id).await.unwrap();
    assert!(harness.state.locator.get(driver).unwrap().is_free());
}

#[tokio::test]
async fn sweeper_retries_exhausted_orders_after_a_pause() {
    let harness = Harness::with_config(single_tier());
    let created = harness.order().await;
    assert_eq!(created.dispatch, DispatchOutcome::Exhausted);

    harness.clock.advance_secs(10);
    let driver = harness.place_driver(1, 1.0);
    assert_eq!(sweep_once(&harness.state).await.retried, 0);

    harness.clock.advance_secs(20);
    let report = sweep_once(&harness.state).await;
    assert_eq!(report.retried, 1);

    let offers = list_offers(&harness.state, driver).await;
    assert_eq!(offers.len(), 1);
    assert_eq!(offers[0].order_id, created.order.id);
}

#[tokio::test]
async fn completion_requires_a_confirmed_order() {
    let harness = Harness::new();
    let order_id = harness.order().await.order.id;

    let result = complete_order(&harness.state, order_id).await;
    assert!(matches!(result, Err(AppError::Conflict(_))));

    let location = driver_location_for_order(&harness.state, order_id).await;
    assert!(matches!(location, Err(AppError::Conflict(_))));
}

#[derive(Default)]
struct RecordingNotifier {
    sent: std::sync::Mutex<Vec<(Uuid, DispatchEvent)>>,
}

impl ride_dispatch::notify::Notifier for RecordingNotifier {
    fn notify(&self, recipient: Uuid, event: DispatchEvent) {
        self.sent.lock().unwrap().push((recipient, event));
    }
}

#[tokio::test]
async fn confirmed_driver_is_told_about_cancellation() {
    let notifier = Arc::new(RecordingNotifier::default());
    let clock = common::ManualClock::new();
    let state = Arc::new(
        ride_dispatch::state::AppState::with_clock(DispatchConfig::default(), 16, clock.clone())
            .with_notifier(notifier.clone()),
    );
    let harness = Harness { state, clock };
    let driver = harness.place_driver(1, 1.0);

    let order_id = harness.order().await.order.id;
    respond(&harness.state, order_id, driver, OfferAction::Accept)
        .await
        .unwrap();
    cancel_order(
        &harness.state,
        order_id,
        CancelReason::DriverDeniedToComeToPickup,
        None,
    )
    .await
    .unwrap();

    let sent = notifier.sent.lock().unwrap().clone();
    let kinds: Vec<_> = sent
        .iter()
        .map(|(_, event)| match event {
            DispatchEvent::OfferCreated { .. } => "offer_created",
            DispatchEvent::DriverFound { .. } => "driver_found",
            DispatchEvent::OrderCancelled { .. } => "order_cancelled",
            DispatchEvent::OrderCompleted { .. } => "order_completed",
        })
        .collect();
    assert_eq!(kinds, vec!["offer_created", "driver_found", "order_cancelled"]);
    assert_eq!(sent[2].0, driver);
    assert!(harness.state.locator.get(driver).unwrap().is_free());
}

#[tokio::test]
async fn cancelling_a_queued_trip_keeps_the_driver_busy() {
    let harness = Harness::new();
    let driver = harness.place_driver(1, 0.5);

    let first = harness.order().await.order.id;
    respond(&harness.state, first, driver, OfferAction::Accept)
        .await
        .unwrap();

    let queued = harness
        .order_at(offset_north(&dropoff(), 1.0), offset_north(&dropoff(), 6.0))
        .await;
    assert_eq!(offered_driver(&queued.dispatch), driver);
    respond(&harness.state, queued.order.id, driver, OfferAction::Accept)
        .await
        .unwrap();

    cancel_order(&harness.state, queued.order.id, CancelReason::ChangeInPlans, None)
        .await
        .unwrap();

    let state = harness.state.locator.get(driver).unwrap();
    assert!(!state.is_free());
    assert_eq!(state.current_trip().unwrap().order_id, first);
    assert_eq!(
        get_order(&harness.state, first).await.unwrap().order.status,
        OrderStatus::Confirmed
    );

    // Still busy, so a pickup next to the driver's position is not theirs.
    let nearby = harness.order().await;
    assert!(matches!(nearby.dispatch, DispatchOutcome::Searching { .. }));
}

#[tokio::test]
async fn busy_driver_cannot_accept_an_unrelated_offer() {
    let harness = Harness::new();
    let driver = harness.place_driver(1, 0.5);

    let north = harness.order().await.order.id;
    let south = harness
        .order_at(offset_north(&pickup(), -4.0), pickup())
        .await;
    assert_eq!(offered_driver(&south.dispatch), driver);

    respond(&harness.state, north, driver, OfferAction::Accept)
        .await
        .unwrap();
    let second = respond(&harness.state, south.order.id, driver, OfferAction::Accept).await;
    assert!(matches!(second, Err(AppError::Conflict(_))));

    let details = get_order(&harness.state, south.order.id).await.unwrap();
    assert_eq!(details.order.status, OrderStatus::Pending);
    assert!(details.order.driver_id.is_none());
    assert_eq!(harness.state.locator.get(driver).unwrap().active_trips.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn background_sweeper_moves_expired_offers_on() {
    let harness = Harness::new();
    let near = harness.place_driver(1, 1.0);
    let next = harness.place_driver(2, 3.0);
    let order_id = harness.order().await.order.id;

    let sweeper = tokio::spawn(run_sweeper(Arc::clone(&harness.state)));

    harness.clock.advance_secs(25);
    sleep(Duration::from_secs(6)).await;

    let details = get_order(&harness.state, order_id).await.unwrap();
    assert_eq!(details.assignments.len(), 2);
    assert_eq!(details.assignments[0].driver_id, near);
    assert_eq!(details.assignments[0].status, AssignmentStatus::Timeout);
    assert_eq!(details.assignments[1].driver_id, next);
    assert_eq!(details.assignments[1].status, AssignmentStatus::Requested);
    assert!(harness.state.metrics.sweep_runs_total.get() >= 1);

    sweeper.abort();
}

#[tokio::test]
async fn settled_orders_leave_the_open_index() {
    let harness = Harness::new();
    let driver = harness.place_driver(1, 1.0);
    harness.place_driver(2, 2.0);

    let completed = harness.order().await.order.id;
    respond(&harness.state, completed, driver, OfferAction::Accept)
        .await
        .unwrap();
    complete_order(&harness.state, completed).await.unwrap();
    assert!(!harness.state.open_orders.contains(&completed));

    let cancelled = harness.order().await.order.id;
    cancel_order(&harness.state, cancelled, CancelReason::ChangeInPlans, None)
        .await
        .unwrap();
    // The dead offer still has to be timed out.
    assert!(harness.state.open_orders.contains(&cancelled));

    harness.clock.advance_secs(25);
    assert_eq!(sweep_once(&harness.state).await.timeouts, 1);
    assert!(harness.state.open_orders.is_empty());
    assert_eq!(harness.state.orders.len(), 2);
}
