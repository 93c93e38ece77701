//! Persistence sink for consumed ride events.
//!
//! The consumer hands every decoded event to a [`RideEventSink`]. Sinks are
//! idempotent on `(trip_id, event_type)`: storing the same pair twice leaves a
//! single row, and the second call reports [`InsertOutcome::Duplicate`] instead
//! of failing. That makes at-least-once delivery safe without retries.
//!
//! # Implementations
//!
//! - **`PostgresRideEventStore`** (in `rideshare-postgres`): production storage
//! - **`InMemoryRideEventSink`** (in `rideshare-testing`): fast, deterministic tests

use crate::event::{EventError, RideEvent};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur while persisting ride events.
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// Database connection or query error.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Payload could not be encoded for storage.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// One row of the `ride_events` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RideEventRecord {
    /// Event identifier
    pub id: String,
    /// Ride the event belongs to
    pub trip_id: String,
    /// Wire name of the event type
    pub event_type: String,
    /// Wire name of the resulting state
    pub event_state: String,
    /// When the event happened
    pub event_time: DateTime<Utc>,
    /// Driver identifier
    pub driver_id: String,
    /// Passenger identifier
    pub passenger_id: String,
    /// JSON encoding of the payload (`null` when absent)
    pub payload: Vec<u8>,
}

impl RideEventRecord {
    /// Flatten an event into a storable row.
    ///
    /// # Errors
    ///
    /// Returns [`EventError::SerializationError`] if the payload cannot be
    /// encoded as JSON.
    pub fn from_event(event: &RideEvent) -> Result<Self, EventError> {
        let payload = serde_json::to_vec(&event.payload)
            .map_err(|e| EventError::SerializationError(e.to_string()))?;

        Ok(Self {
            id: event.id.clone(),
            trip_id: event.trip_id.clone(),
            event_type: event.event_type.as_str().to_string(),
            event_state: event.state.as_str().to_string(),
            event_time: event.timestamp,
            driver_id: event.driver_id.clone(),
            passenger_id: event.passenger_id.clone(),
            payload,
        })
    }
}

/// What an insert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// A new row was written
    Inserted,
    /// A row for this `(trip_id, event_type)` already existed; nothing changed
    Duplicate,
}

/// Idempotent store for ride events.
///
/// # Dyn Compatibility
///
/// Uses explicit `Pin<Box<dyn Future>>` returns so the consumer can hold an
/// `Arc<dyn RideEventSink>`.
pub trait RideEventSink: Send + Sync {
    /// Insert a record, ignoring conflicts on `(trip_id, event_type)`.
    ///
    /// # Errors
    ///
    /// Returns [`PersistenceError::DatabaseError`] if the write fails for any
    /// reason other than a duplicate key.
    fn insert_ride_event(
        &self,
        record: &RideEventRecord,
    ) -> Pin<Box<dyn Future<Output = Result<InsertOutcome, PersistenceError>> + Send + '_>>;
}
