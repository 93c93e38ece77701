//! # Rideshare Testing
//!
//! Testing utilities for the rideshare pipeline.
//!
//! This crate provides:
//! - Deterministic [`Clock`] and [`IdGenerator`] implementations
//! - [`InMemoryEventBus`]: records publishes and feeds subscribers
//! - [`InMemoryRideEventSink`]: idempotent `HashMap` storage
//! - Fixture builders for ride events
//!
//! ## Example
//!
//! ```
//! use rideshare_core::environment::Clock;
//! use rideshare_testing::test_clock;
//!
//! let clock = test_clock();
//! assert_eq!(clock.now(), clock.now());
//! ```

use chrono::{DateTime, Utc};
use rideshare_core::environment::{Clock, IdGenerator};

mod event_bus;
mod sink;

/// Mock implementations of the injected dependencies.
pub mod mocks {
    use super::{Clock, DateTime, IdGenerator, Utc};
    use std::sync::atomic::{AtomicU64, Ordering};

    pub use crate::event_bus::InMemoryEventBus;
    pub use crate::sink::InMemoryRideEventSink;

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use rideshare_testing::mocks::FixedClock;
    /// use rideshare_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(DateTime::<Utc>::UNIX_EPOCH + chrono::Duration::days(20_089))
    }

    /// Predictable identifiers: `{prefix}-1`, `{prefix}-2`, ...
    ///
    /// # Example
    ///
    /// ```
    /// use rideshare_core::environment::IdGenerator;
    /// use rideshare_testing::mocks::SequentialIdGenerator;
    ///
    /// let ids = SequentialIdGenerator::new("id");
    /// assert_eq!(ids.next_id(), "id-1");
    /// assert_eq!(ids.next_id(), "id-2");
    /// ```
    #[derive(Debug)]
    pub struct SequentialIdGenerator {
        prefix: String,
        counter: AtomicU64,
    }

    impl SequentialIdGenerator {
        /// Start counting at 1 with the given prefix
        #[must_use]
        pub fn new(prefix: impl Into<String>) -> Self {
            Self {
                prefix: prefix.into(),
                counter: AtomicU64::new(0),
            }
        }

        /// Number of identifiers handed out so far
        #[must_use]
        pub fn issued(&self) -> u64 {
            self.counter.load(Ordering::SeqCst)
        }
    }

    impl Default for SequentialIdGenerator {
        fn default() -> Self {
            Self::new("id")
        }
    }

    impl IdGenerator for SequentialIdGenerator {
        fn next_id(&self) -> String {
            let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
            format!("{}-{n}", self.prefix)
        }
    }
}

/// Fixture builders.
pub mod helpers {
    use super::{DateTime, Utc};
    use rideshare_core::event::{
        CancelledBy, RideAcceptedPayload, RideCancelledPayload, RideCompletedPayload, RideEvent,
        RideEventType, RidePayload, RideRequestedPayload, RideStartedPayload, RideState,
    };

    /// A well-formed event of the given type for `trip_id`.
    ///
    /// The state is the one the standard lifecycle produces for that type and
    /// the payload variant matches the type.
    #[must_use]
    pub fn ride_event(trip_id: &str, event_type: RideEventType, at: DateTime<Utc>) -> RideEvent {
        let (state, payload) = match event_type {
            RideEventType::RideRequested => (
                RideState::Requested,
                RidePayload::Requested(RideRequestedPayload {
                    passenger: format!("passenger-{trip_id}"),
                    pickup_location: "37.77490,-122.41940".to_string(),
                    dropoff_location: "37.80440,-122.27110".to_string(),
                }),
            ),
            RideEventType::RideAccepted => (
                RideState::Accepted,
                RidePayload::Accepted(RideAcceptedPayload {
                    driver_id: format!("driver-{trip_id}"),
                }),
            ),
            RideEventType::TripStarted => (
                RideState::InProgress,
                RidePayload::Started(RideStartedPayload { start_time: at }),
            ),
            RideEventType::TripCompleted => (
                RideState::Completed,
                RidePayload::Completed(RideCompletedPayload {
                    end_time: at,
                    distance_km: 10.0,
                    fare_usd: 12.5,
                }),
            ),
            RideEventType::TripCancelled => (
                RideState::Cancelled,
                RidePayload::Cancelled(RideCancelledPayload {
                    cancelled_by: CancelledBy::Passenger,
                    reason: Some("no_show".to_string()),
                }),
            ),
        };

        RideEvent {
            id: format!("{trip_id}-{}", event_type.as_str().to_lowercase()),
            trip_id: trip_id.to_string(),
            event_type: event_type.into(),
            timestamp: at,
            state,
            driver_id: format!("driver-{trip_id}"),
            passenger_id: format!("passenger-{trip_id}"),
            payload: Some(payload),
        }
    }

    /// The full happy-path sequence for one ride.
    #[must_use]
    pub fn completed_ride(trip_id: &str, at: DateTime<Utc>) -> Vec<RideEvent> {
        [
            RideEventType::RideRequested,
            RideEventType::RideAccepted,
            RideEventType::TripStarted,
            RideEventType::TripCompleted,
        ]
        .into_iter()
        .map(|event_type| ride_event(trip_id, event_type, at))
        .collect()
    }
}

// Re-export commonly used items
pub use helpers::{completed_ride, ride_event};
pub use mocks::{
    FixedClock, InMemoryEventBus, InMemoryRideEventSink, SequentialIdGenerator, test_clock,
};
