//! Ride event vocabulary and the JSON envelope that carries it.
//!
//! Every state change of a ride produces one [`RideEvent`]. The event carries a
//! [`RidePayload`] whose variant is fixed by the event type, so the payload is a
//! closed sum type rather than an open trait object.
//!
//! # Wire format
//!
//! Events travel as JSON objects:
//!
//! ```json
//! {
//!   "id": "4f1c...",
//!   "trip_id": "9a2b...",
//!   "type": "COMPLETED",
//!   "timestamp": "2025-01-01T00:00:00Z",
//!   "state": "COMPLETED",
//!   "driver_id": "d-1",
//!   "passenger_id": "p-1",
//!   "payload": { "end_time": "2025-01-01T00:00:00Z", "distance_km": 10.0, "fare_usd": 12.5 }
//! }
//! ```
//!
//! Decoding reads `type` first and picks the payload shape from it. An unknown
//! `type` still decodes; its payload is dropped (`None`).
//!
//! # Example
//!
//! ```
//! use rideshare_core::event::{Event, EventKind, RideEvent, RideEventType};
//!
//! let json = br#"{
//!     "id": "e-1", "trip_id": "t-1", "type": "ACCEPTED",
//!     "timestamp": "2025-01-01T00:00:00Z", "state": "ACCEPTED",
//!     "driver_id": "d-1", "passenger_id": "p-1",
//!     "payload": { "driver_id": "d-1" }
//! }"#;
//!
//! let event = RideEvent::from_bytes(json).unwrap();
//! assert_eq!(event.event_type, EventKind::Known(RideEventType::RideAccepted));
//! ```

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Error types for event encoding and decoding.
#[derive(Error, Debug)]
pub enum EventError {
    /// Failed to serialize event to bytes.
    #[error("Failed to serialize event: {0}")]
    SerializationError(String),

    /// Failed to deserialize event from bytes.
    #[error("Failed to deserialize event: {0}")]
    DeserializationError(String),

    /// Event has an empty trip identifier and cannot be routed.
    #[error("Event of type {event_type} has no trip id")]
    MissingTripId {
        /// Type of the rejected event
        event_type: String,
    },

    /// Event has an empty type.
    #[error("Event for trip {trip_id} has no event type")]
    MissingEventType {
        /// Trip the rejected event belongs to
        trip_id: String,
    },

    /// A known event type arrived without its payload.
    #[error("Event type {0} requires a payload")]
    MissingPayload(RideEventType),
}

/// Lifecycle state of a ride.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RideState {
    /// Not yet requested. Rides are never created in this state.
    New,
    /// Passenger asked for a ride
    Requested,
    /// A driver accepted the request
    Accepted,
    /// Passenger is on board
    InProgress,
    /// Trip finished normally (terminal)
    Completed,
    /// Trip was cancelled (terminal)
    Cancelled,
}

impl RideState {
    /// Every state, in lifecycle order.
    pub const ALL: [Self; 6] = [
        Self::New,
        Self::Requested,
        Self::Accepted,
        Self::InProgress,
        Self::Completed,
        Self::Cancelled,
    ];

    /// Wire name of the state.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Requested => "REQUESTED",
            Self::Accepted => "ACCEPTED",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// True for states with no outgoing transitions.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl fmt::Display for RideState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of lifecycle event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RideEventType {
    /// Ride created; seeds the `Requested` state
    #[serde(rename = "REQUESTED")]
    RideRequested,
    /// Driver accepted the ride
    #[serde(rename = "ACCEPTED")]
    RideAccepted,
    /// Passenger picked up
    #[serde(rename = "STARTED")]
    TripStarted,
    /// Passenger dropped off
    #[serde(rename = "COMPLETED")]
    TripCompleted,
    /// Ride cancelled before completion
    #[serde(rename = "CANCELLED")]
    TripCancelled,
}

impl RideEventType {
    /// Every event type.
    pub const ALL: [Self; 5] = [
        Self::RideRequested,
        Self::RideAccepted,
        Self::TripStarted,
        Self::TripCompleted,
        Self::TripCancelled,
    ];

    /// Wire name of the event type.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RideRequested => "REQUESTED",
            Self::RideAccepted => "ACCEPTED",
            Self::TripStarted => "STARTED",
            Self::TripCompleted => "COMPLETED",
            Self::TripCancelled => "CANCELLED",
        }
    }

    /// Parse a wire name. Returns `None` for names this build does not know.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }
}

impl fmt::Display for RideEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `type` field of an envelope.
///
/// Envelopes written by a newer producer may carry types this build does not
/// know; those are kept verbatim so they can still be stored and logged.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    /// A type with a matching payload variant
    Known(RideEventType),
    /// Any other string, including the empty one
    Unrecognized(String),
}

impl EventKind {
    /// Wire name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Known(t) => t.as_str(),
            Self::Unrecognized(s) => s,
        }
    }

    /// The known event type, if any.
    #[must_use]
    pub const fn known(&self) -> Option<RideEventType> {
        match self {
            Self::Known(t) => Some(*t),
            Self::Unrecognized(_) => None,
        }
    }

    /// True when the wire name is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.as_str().is_empty()
    }
}

impl From<RideEventType> for EventKind {
    fn from(t: RideEventType) -> Self {
        Self::Known(t)
    }
}

impl From<String> for EventKind {
    fn from(s: String) -> Self {
        match RideEventType::parse(&s) {
            Some(t) => Self::Known(t),
            None => Self::Unrecognized(s),
        }
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        match kind {
            EventKind::Known(t) => t.as_str().to_string(),
            EventKind::Unrecognized(s) => s,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Data for a new ride request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RideRequestedPayload {
    /// Passenger who requested the ride
    pub passenger: String,
    /// `"lat,lng"` of the pickup point
    pub pickup_location: String,
    /// `"lat,lng"` of the drop-off point
    pub dropoff_location: String,
}

/// Data for an accepted ride.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RideAcceptedPayload {
    /// Driver who accepted
    pub driver_id: String,
}

/// Data for a trip that has begun.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RideStartedPayload {
    /// Pickup time
    pub start_time: DateTime<Utc>,
}

/// Data for a finished trip.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RideCompletedPayload {
    /// Drop-off time
    pub end_time: DateTime<Utc>,
    /// Distance travelled, two decimals
    pub distance_km: f64,
    /// Fare charged, in dollars and cents
    pub fare_usd: f64,
}

/// Who cancelled a ride.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CancelledBy {
    /// The passenger
    Passenger,
    /// The driver
    Driver,
}

/// Data for a cancelled ride.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RideCancelledPayload {
    /// Party that cancelled
    pub cancelled_by: CancelledBy,
    /// Free-form reason, e.g. `"no_show"`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Event-specific data. The variant always matches the event type.
///
/// Serializes as the inner struct's fields only; the discriminant lives in the
/// envelope's `type` field.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RidePayload {
    /// Payload of [`RideEventType::RideRequested`]
    Requested(RideRequestedPayload),
    /// Payload of [`RideEventType::RideAccepted`]
    Accepted(RideAcceptedPayload),
    /// Payload of [`RideEventType::TripStarted`]
    Started(RideStartedPayload),
    /// Payload of [`RideEventType::TripCompleted`]
    Completed(RideCompletedPayload),
    /// Payload of [`RideEventType::TripCancelled`]
    Cancelled(RideCancelledPayload),
}

impl RidePayload {
    /// The event type this payload belongs to.
    #[must_use]
    pub const fn event_type(&self) -> RideEventType {
        match self {
            Self::Requested(_) => RideEventType::RideRequested,
            Self::Accepted(_) => RideEventType::RideAccepted,
            Self::Started(_) => RideEventType::TripStarted,
            Self::Completed(_) => RideEventType::TripCompleted,
            Self::Cancelled(_) => RideEventType::TripCancelled,
        }
    }

    /// Decode a raw JSON payload as the variant selected by `event_type`.
    ///
    /// # Errors
    ///
    /// Returns the underlying `serde_json` error when the value does not have
    /// the fields of the selected variant.
    pub fn decode(
        event_type: RideEventType,
        raw: serde_json::Value,
    ) -> Result<Self, serde_json::Error> {
        Ok(match event_type {
            RideEventType::RideRequested => Self::Requested(serde_json::from_value(raw)?),
            RideEventType::RideAccepted => Self::Accepted(serde_json::from_value(raw)?),
            RideEventType::TripStarted => Self::Started(serde_json::from_value(raw)?),
            RideEventType::TripCompleted => Self::Completed(serde_json::from_value(raw)?),
            RideEventType::TripCancelled => Self::Cancelled(serde_json::from_value(raw)?),
        })
    }
}

/// One ride lifecycle event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawRideEvent")]
pub struct RideEvent {
    /// Unique per event
    pub id: String,
    /// Ride this event belongs to; also the partition key
    pub trip_id: String,
    /// Event type
    #[serde(rename = "type")]
    pub event_type: EventKind,
    /// When the event happened
    pub timestamp: DateTime<Utc>,
    /// State of the ride after this event
    pub state: RideState,
    /// Driver assigned to the ride
    pub driver_id: String,
    /// Passenger of the ride
    pub passenger_id: String,
    /// Event-specific data; `None` only for unrecognized types
    pub payload: Option<RidePayload>,
}

/// Envelope as it appears on the wire, before payload dispatch.
#[derive(Deserialize)]
struct RawRideEvent {
    #[serde(default)]
    id: String,
    trip_id: String,
    #[serde(rename = "type")]
    event_type: EventKind,
    timestamp: DateTime<Utc>,
    state: RideState,
    #[serde(default)]
    driver_id: String,
    #[serde(default)]
    passenger_id: String,
    #[serde(default)]
    payload: Option<serde_json::Value>,
}

impl TryFrom<RawRideEvent> for RideEvent {
    type Error = EventError;

    fn try_from(raw: RawRideEvent) -> Result<Self, Self::Error> {
        let payload = match (raw.event_type.known(), raw.payload) {
            (None, _) => None,
            (Some(event_type), None) => return Err(EventError::MissingPayload(event_type)),
            (Some(event_type), Some(value)) => Some(
                RidePayload::decode(event_type, value).map_err(|e| {
                    EventError::DeserializationError(format!("{event_type} payload: {e}"))
                })?,
            ),
        };

        Ok(Self {
            id: raw.id,
            trip_id: raw.trip_id,
            event_type: raw.event_type,
            timestamp: raw.timestamp,
            state: raw.state,
            driver_id: raw.driver_id,
            passenger_id: raw.passenger_id,
            payload,
        })
    }
}

/// An event that can be routed through the event bus.
///
/// Events are serialized as JSON so that non-Rust consumers can read the
/// stream. Default implementations cover any serde type.
pub trait Event: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Wire name of the event type.
    fn event_type(&self) -> &str;

    /// Partition key; events with equal keys stay ordered.
    fn partition_key(&self) -> &str;

    /// Serialize this event to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns `EventError::SerializationError` if the event cannot be serialized.
    fn to_bytes(&self) -> Result<Vec<u8>, EventError> {
        serde_json::to_vec(self).map_err(|e| EventError::SerializationError(e.to_string()))
    }

    /// Deserialize an event from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns `EventError::DeserializationError` if the bytes are not a valid
    /// envelope, or if a known event type carries a malformed or missing payload.
    fn from_bytes(bytes: &[u8]) -> Result<Self, EventError>
    where
        Self: Sized,
    {
        serde_json::from_slice(bytes).map_err(|e| EventError::DeserializationError(e.to_string()))
    }
}

impl Event for RideEvent {
    fn event_type(&self) -> &str {
        self.event_type.as_str()
    }

    fn partition_key(&self) -> &str {
        &self.trip_id
    }

    /// Decode the envelope, then dispatch the payload on `type`.
    ///
    /// Keeps [`EventError::MissingPayload`] distinct instead of folding it into
    /// the serde error text.
    fn from_bytes(bytes: &[u8]) -> Result<Self, EventError> {
        let raw: RawRideEvent = serde_json::from_slice(bytes)
            .map_err(|e| EventError::DeserializationError(e.to_string()))?;
        Self::try_from(raw)
    }
}

/// A serialized event ready for the transport.
///
/// `key` routes the message to a partition; `data` is the JSON envelope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SerializedEvent {
    /// Partition key (the trip id for ride events)
    pub key: String,

    /// The event type identifier (e.g. `"COMPLETED"`)
    pub event_type: String,

    /// The JSON-serialized event.
    pub data: Vec<u8>,
}

impl SerializedEvent {
    /// Create a new serialized event.
    ///
    /// # Examples
    ///
    /// ```
    /// use rideshare_core::event::SerializedEvent;
    ///
    /// let event = SerializedEvent::new(
    ///     "trip-1".to_string(),
    ///     "ACCEPTED".to_string(),
    ///     b"{}".to_vec(),
    /// );
    /// assert_eq!(event.key, "trip-1");
    /// ```
    #[must_use]
    pub const fn new(key: String, event_type: String, data: Vec<u8>) -> Self {
        Self {
            key,
            event_type,
            data,
        }
    }

    /// Serialize an event for publishing.
    ///
    /// Events with an empty partition key or an empty type are refused so they
    /// never reach the transport.
    ///
    /// # Errors
    ///
    /// - `EventError::MissingTripId` if the partition key is empty
    /// - `EventError::MissingEventType` if the type is empty
    /// - `EventError::SerializationError` if JSON encoding fails
    pub fn from_event<E: Event>(event: &E) -> Result<Self, EventError> {
        if event.partition_key().is_empty() {
            return Err(EventError::MissingTripId {
                event_type: event.event_type().to_string(),
            });
        }
        if event.event_type().is_empty() {
            return Err(EventError::MissingEventType {
                trip_id: event.partition_key().to_string(),
            });
        }
        let data = event.to_bytes()?;

        Ok(Self {
            key: event.partition_key().to_string(),
            event_type: event.event_type().to_string(),
            data,
        })
    }

    /// Decode the carried envelope back into a [`RideEvent`].
    ///
    /// # Errors
    ///
    /// Returns `EventError::DeserializationError` or `EventError::MissingPayload`
    /// if the data is not a valid ride event.
    pub fn decode(&self) -> Result<RideEvent, EventError> {
        RideEvent::from_bytes(&self.data)
    }
}

impl fmt::Display for SerializedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SerializedEvent {{ key: {}, type: {}, size: {} bytes }}",
            self.key,
            self.event_type,
            self.data.len()
        )
    }
}
