//! Ride simulation driver.
//!
//! [`RideSimulator`] owns the working set of in-flight rides and advances it
//! one [`tick`](RideSimulator::tick) at a time. Each tick may admit one new
//! ride, then moves every ride one step through its lifecycle:
//!
//! 1. **Admission**: below capacity, a new ride is created in `Requested` and
//!    its seed `RideRequested` event is emitted.
//! 2. **Advancement**: every ride is visited once. Cancelable rides are
//!    cancelled with probability `cancel_probability`; the others take their
//!    next deterministic step (`Requested → Accepted → InProgress → Completed`).
//! 3. **Retirement**: rides that reached a terminal state, or whose transition
//!    failed, leave the working set and are never visited again.
//!
//! The random source, clock, and id generator are injected so tests can pin
//! every branch.

use crate::environment::{Clock, IdGenerator};
use crate::event::{
    CancelledBy, RideAcceptedPayload, RideCancelledPayload, RideCompletedPayload, RideEvent,
    RideEventType, RidePayload, RideRequestedPayload, RideStartedPayload, RideState,
};
use crate::fsm::{RideFsm, TransitionError, TransitionTable};
use crate::metrics::{RIDES_ACTIVE, RIDES_ADMITTED, RIDES_EVENTS_GENERATED, RIDES_FAULTED};
use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;

/// Default cap on rides in flight.
pub const DEFAULT_MAX_ACTIVE_RIDES: usize = 100;

/// Default chance that a cancelable ride is cancelled on a given tick.
pub const DEFAULT_CANCEL_PROBABILITY: f64 = 0.10;

/// Flag-fall charged on every completed trip.
pub const BASE_FARE_USD: f64 = 2.50;

/// Charge per kilometre travelled.
pub const PER_KM_RATE_USD: f64 = 1.00;

/// Shortest simulated trip.
pub const MIN_TRIP_KM: f64 = 2.0;

/// Longest simulated trip.
pub const MAX_TRIP_KM: f64 = 25.0;

/// Cancellation reason attached to randomized cancellations.
pub const NO_SHOW_REASON: &str = "no_show";

// Pickup/drop-off points are drawn inside San Francisco.
const LAT_RANGE: std::ops::Range<f64> = 37.708..37.810;
const LNG_RANGE: std::ops::Range<f64> = -122.515..-122.357;

/// Tunables for the simulator.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationConfig {
    /// Admission stops while this many rides are in flight
    pub max_active_rides: usize,
    /// Per-tick chance of cancelling a cancelable ride, in `[0, 1]`
    pub cancel_probability: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            max_active_rides: DEFAULT_MAX_ACTIVE_RIDES,
            cancel_probability: DEFAULT_CANCEL_PROBABILITY,
        }
    }
}

/// A ride in flight.
#[derive(Debug, Clone)]
pub struct Ride {
    trip_id: String,
    driver_id: String,
    passenger_id: String,
    fsm: RideFsm,
    updated_at: DateTime<Utc>,
}

impl Ride {
    /// Trip identifier.
    #[must_use]
    pub fn trip_id(&self) -> &str {
        &self.trip_id
    }

    /// Driver identifier.
    #[must_use]
    pub fn driver_id(&self) -> &str {
        &self.driver_id
    }

    /// Passenger identifier.
    #[must_use]
    pub fn passenger_id(&self) -> &str {
        &self.passenger_id
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> RideState {
        self.fsm.state()
    }

    /// When the ride last changed state.
    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// True once the ride is `Completed` or `Cancelled`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.fsm.is_terminal()
    }

    /// Materialize the event describing this ride's current state.
    fn event(&self, id: String, timestamp: DateTime<Utc>, payload: RidePayload) -> RideEvent {
        RideEvent {
            id,
            trip_id: self.trip_id.clone(),
            event_type: payload.event_type().into(),
            timestamp,
            state: self.fsm.state(),
            driver_id: self.driver_id.clone(),
            passenger_id: self.passenger_id.clone(),
            payload: Some(payload),
        }
    }
}

/// A ride removed from the working set because its transition failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RideFault {
    /// Ride that faulted
    pub trip_id: String,
    /// Why
    pub error: TransitionError,
}

/// Result of one tick.
#[derive(Debug, Default)]
pub struct TickOutcome {
    /// Events to emit, in generation order
    pub events: Vec<RideEvent>,
    /// Rides dropped because a transition failed
    pub faults: Vec<RideFault>,
    /// Trip id of the ride admitted this tick
    pub admitted: Option<String>,
    /// Number of rides that reached a terminal state this tick
    pub retired: usize,
}

/// Next step of the normal progression, or `None` for states that do not advance.
#[must_use]
pub const fn next_event_for(state: RideState) -> Option<RideEventType> {
    match state {
        RideState::Requested => Some(RideEventType::RideAccepted),
        RideState::Accepted => Some(RideEventType::TripStarted),
        RideState::InProgress => Some(RideEventType::TripCompleted),
        RideState::New | RideState::Completed | RideState::Cancelled => None,
    }
}

/// Round to two decimal places.
#[must_use]
pub fn round_to_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Fare for a trip of `distance_km` kilometres.
///
/// ```
/// use rideshare_core::simulation::fare_for_distance;
///
/// assert_eq!(fare_for_distance(10.0), 12.50);
/// assert_eq!(fare_for_distance(0.0), 2.50);
/// ```
#[must_use]
pub fn fare_for_distance(distance_km: f64) -> f64 {
    round_to_cents(BASE_FARE_USD + PER_KM_RATE_USD * distance_km)
}

fn random_location<R: Rng>(rng: &mut R) -> String {
    let lat = rng.gen_range(LAT_RANGE);
    let lng = rng.gen_range(LNG_RANGE);
    format!("{lat:.5},{lng:.5}")
}

fn random_distance<R: Rng>(rng: &mut R) -> f64 {
    round_to_cents(rng.gen_range(MIN_TRIP_KM..=MAX_TRIP_KM))
}

fn payload_for<R: Rng>(
    event_type: RideEventType,
    ride: &Ride,
    now: DateTime<Utc>,
    rng: &mut R,
) -> RidePayload {
    match event_type {
        RideEventType::RideRequested => RidePayload::Requested(RideRequestedPayload {
            passenger: ride.passenger_id.clone(),
            pickup_location: random_location(rng),
            dropoff_location: random_location(rng),
        }),
        RideEventType::RideAccepted => RidePayload::Accepted(RideAcceptedPayload {
            driver_id: ride.driver_id.clone(),
        }),
        RideEventType::TripStarted => RidePayload::Started(RideStartedPayload { start_time: now }),
        RideEventType::TripCompleted => {
            let distance_km = random_distance(rng);
            RidePayload::Completed(RideCompletedPayload {
                end_time: now,
                distance_km,
                fare_usd: fare_for_distance(distance_km),
            })
        },
        RideEventType::TripCancelled => RidePayload::Cancelled(RideCancelledPayload {
            cancelled_by: CancelledBy::Passenger,
            reason: Some(NO_SHOW_REASON.to_string()),
        }),
    }
}

/// Drives simulated rides through their lifecycle.
///
/// # Example
///
/// ```
/// use rand::SeedableRng;
/// use rand::rngs::StdRng;
/// use rideshare_core::environment::{SystemClock, UuidGenerator};
/// use rideshare_core::fsm::TransitionTable;
/// use rideshare_core::simulation::{RideSimulator, SimulationConfig};
/// use std::sync::Arc;
///
/// let mut simulator = RideSimulator::new(
///     SimulationConfig::default(),
///     Arc::new(TransitionTable::standard()),
///     StdRng::seed_from_u64(7),
///     Arc::new(SystemClock),
///     Arc::new(UuidGenerator),
/// );
///
/// let outcome = simulator.tick();
/// assert!(!outcome.events.is_empty());
/// ```
pub struct RideSimulator<R> {
    rides: HashMap<String, Ride>,
    table: Arc<TransitionTable>,
    config: SimulationConfig,
    rng: R,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl<R: Rng> RideSimulator<R> {
    /// Create a simulator with an empty working set.
    #[must_use]
    pub fn new(
        config: SimulationConfig,
        table: Arc<TransitionTable>,
        rng: R,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self {
            rides: HashMap::new(),
            table,
            config,
            rng,
            clock,
            ids,
        }
    }

    /// Simulator configuration.
    #[must_use]
    pub const fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Number of rides in flight.
    #[must_use]
    pub fn active_rides(&self) -> usize {
        self.rides.len()
    }

    /// Whether a ride is still in flight.
    #[must_use]
    pub fn contains(&self, trip_id: &str) -> bool {
        self.rides.contains_key(trip_id)
    }

    /// Look up a ride in flight.
    #[must_use]
    pub fn ride(&self, trip_id: &str) -> Option<&Ride> {
        self.rides.get(trip_id)
    }

    /// Run one tick: admit, advance every ride once, retire finished rides.
    pub fn tick(&mut self) -> TickOutcome {
        let mut outcome = TickOutcome::default();

        if self.rides.len() < self.config.max_active_rides {
            if let Some(seed) = self.admit() {
                outcome.admitted = Some(seed.trip_id.clone());
                outcome.events.push(seed);
            }
        }

        let trip_ids: Vec<String> = self.rides.keys().cloned().collect();
        for trip_id in trip_ids {
            match self.advance(&trip_id) {
                Ok(Some(event)) => outcome.events.push(event),
                Ok(None) => {},
                Err(error) => {
                    self.rides.remove(&trip_id);
                    tracing::warn!(trip_id = %trip_id, error = %error, "Ride faulted, dropping it");
                    metrics::counter!(RIDES_FAULTED).increment(1);
                    outcome.faults.push(RideFault { trip_id, error });
                    continue;
                },
            }

            if self.rides.get(&trip_id).is_some_and(Ride::is_terminal) {
                self.rides.remove(&trip_id);
                outcome.retired += 1;
            }
        }

        metrics::counter!(RIDES_EVENTS_GENERATED).increment(outcome.events.len() as u64);
        #[allow(clippy::cast_precision_loss)] // ride counts stay far below 2^52
        let active = self.rides.len() as f64;
        metrics::gauge!(RIDES_ACTIVE).set(active);

        tracing::debug!(
            events = outcome.events.len(),
            faults = outcome.faults.len(),
            retired = outcome.retired,
            active = self.rides.len(),
            "Tick complete"
        );

        outcome
    }

    fn admit(&mut self) -> Option<RideEvent> {
        let now = self.clock.now();
        let ride = Ride {
            trip_id: self.ids.next_id(),
            driver_id: self.ids.next_id(),
            passenger_id: self.ids.next_id(),
            fsm: RideFsm::new(Arc::clone(&self.table)),
            updated_at: now,
        };

        if self.rides.contains_key(&ride.trip_id) {
            tracing::warn!(trip_id = %ride.trip_id, "Generated trip id already in flight, skipping admission");
            return None;
        }

        let payload = payload_for(RideEventType::RideRequested, &ride, now, &mut self.rng);
        let seed = ride.event(self.ids.next_id(), now, payload);

        tracing::debug!(trip_id = %ride.trip_id, "Ride admitted");
        metrics::counter!(RIDES_ADMITTED).increment(1);

        self.rides.insert(ride.trip_id.clone(), ride);
        Some(seed)
    }

    fn advance(&mut self, trip_id: &str) -> Result<Option<RideEvent>, TransitionError> {
        let now = self.clock.now();
        let Some(ride) = self.rides.get_mut(trip_id) else {
            return Ok(None);
        };

        let cancel = !ride.fsm.is_terminal()
            && ride.fsm.is_cancelable()
            && self.rng.gen_range(0.0..1.0) < self.config.cancel_probability;

        let event_type = if cancel {
            RideEventType::TripCancelled
        } else {
            match next_event_for(ride.state()) {
                Some(next) => next,
                None => return Ok(None),
            }
        };

        ride.fsm.apply(event_type)?;
        ride.updated_at = now;

        let payload = payload_for(event_type, ride, now, &mut self.rng);
        Ok(Some(ride.event(self.ids.next_id(), now, payload)))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic, clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::event::EventKind;
    use chrono::TimeZone;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct StillClock;

    impl Clock for StillClock {
        fn now(&self) -> DateTime<Utc> {
            Utc.with_ymd_and_hms(2025, 1, 1, 8, 0, 0).unwrap()
        }
    }

    #[derive(Default)]
    struct CountingIds(AtomicU64);

    impl IdGenerator for CountingIds {
        fn next_id(&self) -> String {
            format!("id-{}", self.0.fetch_add(1, Ordering::Relaxed))
        }
    }

    fn simulator_with(
        max_active_rides: usize,
        cancel_probability: f64,
        table: TransitionTable,
    ) -> RideSimulator<StdRng> {
        RideSimulator::new(
            SimulationConfig {
                max_active_rides,
                cancel_probability,
            },
            Arc::new(table),
            StdRng::seed_from_u64(42),
            Arc::new(StillClock),
            Arc::new(CountingIds::default()),
        )
    }

    fn simulator(max_active_rides: usize, cancel_probability: f64) -> RideSimulator<StdRng> {
        simulator_with(max_active_rides, cancel_probability, TransitionTable::standard())
    }

    fn kinds(outcome: &TickOutcome) -> Vec<RideEventType> {
        outcome
            .events
            .iter()
            .map(|e| e.event_type.known().unwrap())
            .collect()
    }

    #[test]
    fn fare_formula() {
        assert_eq!(fare_for_distance(10.0), 12.50);
        assert_eq!(fare_for_distance(0.0), 2.50);
        assert_eq!(fare_for_distance(7.25), 9.75);
    }

    #[test]
    fn progression_follows_the_happy_path() {
        assert_eq!(next_event_for(RideState::Requested), Some(RideEventType::RideAccepted));
        assert_eq!(next_event_for(RideState::Accepted), Some(RideEventType::TripStarted));
        assert_eq!(next_event_for(RideState::InProgress), Some(RideEventType::TripCompleted));
        assert_eq!(next_event_for(RideState::New), None);
        assert_eq!(next_event_for(RideState::Completed), None);
        assert_eq!(next_event_for(RideState::Cancelled), None);
    }

    #[test]
    fn first_tick_admits_and_advances_the_new_ride() {
        let mut sim = simulator(100, 0.0);
        let outcome = sim.tick();

        assert_eq!(
            kinds(&outcome),
            vec![RideEventType::RideRequested, RideEventType::RideAccepted]
        );
        let trip_id = outcome.admitted.clone().unwrap();
        let seed = &outcome.events[0];
        assert_eq!(seed.trip_id, trip_id);
        assert_eq!(seed.state, RideState::Requested);
        match &seed.payload {
            Some(RidePayload::Requested(p)) => {
                assert_eq!(p.passenger, seed.passenger_id);
                assert_ne!(p.pickup_location, p.dropoff_location);
            },
            other => panic!("unexpected seed payload {other:?}"),
        }
        assert_eq!(sim.ride(&trip_id).unwrap().state(), RideState::Accepted);
    }

    #[test]
    fn completed_ride_leaves_the_working_set_on_the_tick_it_completes() {
        let mut sim = simulator(100, 0.0);
        let trip_id = sim.tick().admitted.unwrap();

        sim.tick();
        assert_eq!(sim.ride(&trip_id).unwrap().state(), RideState::InProgress);

        let outcome = sim.tick();
        assert!(!sim.contains(&trip_id));
        assert_eq!(outcome.retired, 1);

        let completed = outcome
            .events
            .iter()
            .find(|e| e.trip_id == trip_id)
            .unwrap();
        assert_eq!(completed.state, RideState::Completed);
        match &completed.payload {
            Some(RidePayload::Completed(p)) => {
                assert!((MIN_TRIP_KM..=MAX_TRIP_KM).contains(&p.distance_km));
                assert_eq!(p.distance_km, round_to_cents(p.distance_km));
                assert_eq!(p.fare_usd, fare_for_distance(p.distance_km));
            },
            other => panic!("unexpected completion payload {other:?}"),
        }
    }

    #[test]
    fn certain_cancellation_cancels_on_admission_tick() {
        let mut sim = simulator(100, 1.0);
        let outcome = sim.tick();

        assert_eq!(
            kinds(&outcome),
            vec![RideEventType::RideRequested, RideEventType::TripCancelled]
        );
        let cancelled = &outcome.events[1];
        assert_eq!(cancelled.state, RideState::Cancelled);
        assert_eq!(
            cancelled.payload,
            Some(RidePayload::Cancelled(RideCancelledPayload {
                cancelled_by: CancelledBy::Passenger,
                reason: Some("no_show".to_string()),
            }))
        );
        assert_eq!(sim.active_rides(), 0);
        assert_eq!(outcome.retired, 1);
    }

    #[test]
    fn in_progress_rides_are_not_randomly_cancelled() {
        let mut sim = simulator(1, 0.0);
        let trip_id = sim.tick().admitted.unwrap();
        sim.tick();
        assert_eq!(sim.ride(&trip_id).unwrap().state(), RideState::InProgress);

        sim.config.cancel_probability = 1.0;
        let outcome = sim.tick();
        assert_eq!(kinds(&outcome), vec![RideEventType::TripCompleted]);
    }

    #[test]
    fn admission_stops_at_capacity() {
        let mut sim = simulator(2, 0.0);

        let first = sim.tick();
        assert!(first.admitted.is_some());
        let second = sim.tick();
        assert!(second.admitted.is_some());
        assert_eq!(sim.active_rides(), 2);

        let third = sim.tick();
        assert!(third.admitted.is_none());
        assert!(!kinds(&third).contains(&RideEventType::RideRequested));
        assert_eq!(sim.active_rides(), 1);

        let fourth = sim.tick();
        assert!(fourth.admitted.is_some());
    }

    #[test]
    fn zero_capacity_emits_nothing() {
        let mut sim = simulator(0, 0.0);
        let outcome = sim.tick();
        assert!(outcome.events.is_empty());
        assert_eq!(sim.active_rides(), 0);
    }

    #[test]
    fn undefined_state_faults_and_drops_the_ride() {
        let table = TransitionTable::empty().with_transition(
            RideState::Requested,
            RideEventType::RideAccepted,
            RideState::Accepted,
        );
        let mut sim = simulator_with(1, 0.0, table);
        let trip_id = sim.tick().admitted.unwrap();

        let outcome = sim.tick();
        assert!(outcome.events.is_empty());
        assert_eq!(
            outcome.faults,
            vec![RideFault {
                trip_id: trip_id.clone(),
                error: TransitionError::UndefinedState {
                    state: RideState::Accepted
                },
            }]
        );
        assert!(!sim.contains(&trip_id));
    }

    #[test]
    fn invalid_cancellation_faults_the_ride() {
        let table = TransitionTable::empty().with_transition(
            RideState::Requested,
            RideEventType::RideAccepted,
            RideState::Accepted,
        );
        let mut sim = simulator_with(1, 1.0, table);
        let outcome = sim.tick();

        assert_eq!(kinds(&outcome), vec![RideEventType::RideRequested]);
        assert!(matches!(
            outcome.faults[0].error,
            TransitionError::InvalidTransition {
                state: RideState::Requested,
                event: RideEventType::TripCancelled,
            }
        ));
        assert_eq!(sim.active_rides(), 0);
    }

    #[test]
    fn long_run_emits_only_consistent_events() {
        let table = TransitionTable::standard();
        let mut sim = simulator(10, DEFAULT_CANCEL_PROBABILITY);
        let mut ids = HashSet::new();
        let mut finished = HashSet::new();

        for _ in 0..200 {
            let outcome = sim.tick();
            assert!(outcome.faults.is_empty());
            assert!(sim.active_rides() <= 10);

            for event in outcome.events {
                let EventKind::Known(event_type) = event.event_type else {
                    panic!("simulator emitted an unrecognized type");
                };
                assert!(table.produces(event_type, event.state), "{event_type} -> {}", event.state);
                assert_eq!(event.payload.as_ref().map(RidePayload::event_type), Some(event_type));
                assert!(!event.trip_id.is_empty());
                assert!(ids.insert(event.id.clone()), "duplicate event id {}", event.id);
                assert!(!finished.contains(&event.trip_id), "retired ride {} came back", event.trip_id);

                if event.state.is_terminal() {
                    finished.insert(event.trip_id);
                }
            }
        }

        assert!(!finished.is_empty());
    }
}
