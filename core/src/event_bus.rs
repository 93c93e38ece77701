//! Event bus abstraction between the generator and the consumer.
//!
//! The generator publishes every ride event to the `ride-events` topic; the
//! consumer subscribes to it and writes each event to the store.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  RideSimulator  │
//! └────────┬────────┘
//!          │ RideEvent
//!          ▼
//! ┌─────────────────┐
//! │ SerializedEvent │  key = trip_id, data = JSON envelope
//! └────────┬────────┘
//!          │ publish
//!          ▼
//! ┌─────────────────┐
//! │    Event Bus    │◄─── At-least-once delivery
//! └────────┬────────┘
//!          │ subscribe
//!          ▼
//! ┌─────────────────┐
//! │  RideEventSink  │◄─── Idempotent on (trip_id, event_type)
//! └─────────────────┘
//! ```
//!
//! # Key Principles
//!
//! - **Keyed by trip**: all events of one ride land in the same partition, in order
//! - **At-least-once delivery**: events may be delivered multiple times
//! - **Idempotency**: the sink ignores duplicates
//!
//! # Implementations
//!
//! - `InMemoryEventBus` (in `rideshare-testing`) - For testing
//! - `RedpandaEventBus` (in `rideshare-redpanda`) - For production (Kafka-compatible)
//!
//! # Example
//!
//! ```rust,ignore
//! use rideshare_core::event_bus::EventBus;
//! use rideshare_core::event::SerializedEvent;
//!
//! async fn example(event_bus: impl EventBus) {
//!     let event = SerializedEvent::from_event(&ride_event)?;
//!     event_bus.publish("ride-events", &event).await?;
//!
//!     let mut stream = event_bus.subscribe(&["ride-events"]).await?;
//!     while let Some(result) = stream.next().await {
//!         match result {
//!             Ok(event) => println!("Received: {}", event.event_type),
//!             Err(e) => eprintln!("Error: {}", e),
//!         }
//!     }
//! }
//! ```

use crate::event::SerializedEvent;
use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Default topic for ride lifecycle events.
pub const RIDE_EVENTS_TOPIC: &str = "ride-events";

/// Errors that can occur during event bus operations.
#[derive(Error, Debug, Clone)]
pub enum EventBusError {
    /// Failed to connect to the event bus
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish an event to a topic
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe to topics
    #[error("Subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe
        topics: Vec<String>,
        /// The reason for failure
        reason: String,
    },

    /// A received message could not be turned into an event
    #[error("Deserialization failed: {0}")]
    DeserializationFailed(String),

    /// Network or transport error
    #[error("Transport error: {0}")]
    TransportError(String),

    /// Outstanding messages were not delivered before the flush deadline
    #[error("Flush failed: {0}")]
    FlushFailed(String),
}

/// Stream of events from subscriptions.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<SerializedEvent, EventBusError>> + Send>>;

/// Trait for event bus implementations.
///
/// # Design Principles
///
/// - **Async-first**: publish and subscribe never block the caller's thread
/// - **Ordered delivery**: events with the same key keep their order
/// - **At-least-once**: subscribers may receive duplicate events
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// so it can be used as `Arc<dyn EventBus>` by the publisher's delivery task.
pub trait EventBus: Send + Sync {
    /// Publish an event to a topic, keyed by `event.key`.
    ///
    /// Resolves once the transport has acknowledged the message.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::PublishFailed`] if the publish operation fails.
    fn publish(
        &self,
        topic: &str,
        event: &SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>>;

    /// Subscribe to one or more topics and receive a stream of events.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SubscriptionFailed`] if subscription fails.
    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>>;

    /// Wait up to `timeout` for buffered outbound messages to be delivered.
    ///
    /// Implementations without an outbound buffer return immediately.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::FlushFailed`] if messages remain after `timeout`.
    fn flush(&self, timeout: Duration) -> Result<(), EventBusError> {
        let _ = timeout;
        Ok(())
    }
}
