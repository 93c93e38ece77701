//! # Rideshare Core
//!
//! Ride lifecycle model, state machine, and simulation driver for the
//! rideshare event pipeline.
//!
//! A producer runs a [`simulation::RideSimulator`] on a fixed tick, turns every
//! [`event::RideEvent`] into a [`event::SerializedEvent`] keyed by trip, and
//! publishes it through an [`event_bus::EventBus`]. A consumer subscribes to the
//! same topic, decodes each message, and stores it through an idempotent
//! [`sink::RideEventSink`].
//!
//! ## Core Concepts
//!
//! - **Ride state**: `Requested → Accepted → InProgress → Completed`, with
//!   `Cancelled` reachable from every live state. Rides never enter `New`
//! - **Transition table**: the only source of legal moves, passed in explicitly
//! - **Tick**: one admission attempt plus one step for every in-flight ride
//! - **Envelope**: the JSON record published per event, discriminated by `type`
//!
//! ## Example
//!
//! ```
//! use rideshare_core::event::{RideEventType, RideState};
//! use rideshare_core::fsm::{RideFsm, TransitionTable};
//! use std::sync::Arc;
//!
//! let mut fsm = RideFsm::new(Arc::new(TransitionTable::standard()));
//! fsm.apply(RideEventType::RideAccepted).unwrap();
//! fsm.apply(RideEventType::TripStarted).unwrap();
//! assert_eq!(fsm.state(), RideState::InProgress);
//! ```

pub use chrono::{DateTime, Utc};

pub mod event;
pub mod event_bus;
pub mod fsm;
pub mod logging;
pub mod metrics;
pub mod shutdown;
pub mod simulation;
pub mod sink;

pub use event::{EventError, EventKind, RideEvent, RideEventType, RideState, SerializedEvent};
pub use event_bus::{EventBus, EventBusError, RIDE_EVENTS_TOPIC};
pub use fsm::{RideFsm, TransitionError, TransitionTable};
pub use simulation::{RideSimulator, SimulationConfig, TickOutcome};
pub use sink::{InsertOutcome, PersistenceError, RideEventRecord, RideEventSink};

/// Injected dependencies.
///
/// Time and identifiers come from traits so tests can pin both.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use rideshare_core::environment::{Clock, SystemClock};
    ///
    /// let before = chrono::Utc::now();
    /// assert!(SystemClock.now() >= before);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall-clock time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }

    /// Source of unique identifiers for rides, drivers, passengers, and events.
    pub trait IdGenerator: Send + Sync {
        /// Produce a fresh identifier
        fn next_id(&self) -> String;
    }

    /// Random v4 UUIDs.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct UuidGenerator;

    impl IdGenerator for UuidGenerator {
        fn next_id(&self) -> String {
            uuid::Uuid::new_v4().to_string()
        }
    }

}
