//! In-memory [`RideEventSink`] for tests.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Lock poisoning only follows a panicking test

use rideshare_core::sink::{InsertOutcome, PersistenceError, RideEventRecord, RideEventSink};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct SinkState {
    rows: HashMap<(String, String), RideEventRecord>,
    attempts: usize,
    fail_inserts: bool,
}

/// Sink that stores rows in a `HashMap` keyed by `(trip_id, event_type)`.
///
/// Mirrors the database's conflict rule: the first insert for a key wins and
/// later ones report [`InsertOutcome::Duplicate`].
///
/// # Example
///
/// ```
/// use rideshare_core::sink::{InsertOutcome, RideEventRecord, RideEventSink};
/// use rideshare_testing::{InMemoryRideEventSink, ride_event, test_clock};
/// use rideshare_core::environment::Clock;
/// use rideshare_core::event::RideEventType;
///
/// # tokio_test::block_on(async {
/// let sink = InMemoryRideEventSink::new();
/// let event = ride_event("trip-1", RideEventType::RideAccepted, test_clock().now());
/// let record = RideEventRecord::from_event(&event).unwrap();
///
/// assert_eq!(sink.insert_ride_event(&record).await.unwrap(), InsertOutcome::Inserted);
/// assert_eq!(sink.insert_ride_event(&record).await.unwrap(), InsertOutcome::Duplicate);
/// assert_eq!(sink.len(), 1);
/// # });
/// ```
#[derive(Clone, Default)]
pub struct InMemoryRideEventSink {
    state: Arc<Mutex<SinkState>>,
}

impl InMemoryRideEventSink {
    /// Create an empty sink
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rows
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().rows.len()
    }

    /// True when nothing is stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of insert calls, including duplicates and failures
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.state.lock().unwrap().attempts
    }

    /// Stored row for a `(trip_id, event_type)` pair
    #[must_use]
    pub fn get(&self, trip_id: &str, event_type: &str) -> Option<RideEventRecord> {
        self.state
            .lock()
            .unwrap()
            .rows
            .get(&(trip_id.to_string(), event_type.to_string()))
            .cloned()
    }

    /// Rows of one ride, ordered by event time
    #[must_use]
    pub fn trip_events(&self, trip_id: &str) -> Vec<RideEventRecord> {
        let mut rows: Vec<RideEventRecord> = self
            .state
            .lock()
            .unwrap()
            .rows
            .values()
            .filter(|row| row.trip_id == trip_id)
            .cloned()
            .collect();
        rows.sort_by_key(|row| row.event_time);
        rows
    }

    /// Make every following insert fail with `DatabaseError` (or succeed again)
    pub fn fail_inserts(&self, fail: bool) {
        self.state.lock().unwrap().fail_inserts = fail;
    }
}

impl RideEventSink for InMemoryRideEventSink {
    fn insert_ride_event(
        &self,
        record: &RideEventRecord,
    ) -> Pin<Box<dyn Future<Output = Result<InsertOutcome, PersistenceError>> + Send + '_>> {
        let record = record.clone();

        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.attempts += 1;
            if state.fail_inserts {
                return Err(PersistenceError::DatabaseError(
                    "inserts disabled for this test".to_string(),
                ));
            }

            let key = (record.trip_id.clone(), record.event_type.clone());
            if state.rows.contains_key(&key) {
                return Ok(InsertOutcome::Duplicate);
            }
            state.rows.insert(key, record);
            Ok(InsertOutcome::Inserted)
        })
    }
}
