//! Hand-off between the generator loop and the event bus.
//!
//! The loop never waits on the broker. [`RideEventPublisher::emit`] serializes
//! an event and pushes it onto an unbounded channel. A single delivery task
//! hands each message to the bus in channel order without waiting for the
//! previous acknowledgement; up to [`MAX_IN_FLIGHT`] publishes may be pending
//! at once. Acknowledgements are collected in the same order, then logged and
//! counted, never reported back to the loop.

use futures::StreamExt;
use rideshare_core::event::{EventError, RideEvent, SerializedEvent};
use rideshare_core::event_bus::EventBus;
use rideshare_core::metrics::{EVENTS_PUBLISHED, EVENTS_PUBLISH_FAILED};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Publishes that may await acknowledgement at the same time.
///
/// Stays far below librdkafka's default `queue.buffering.max.messages`
/// (100 000), so enqueueing never meets a full local queue and records keep
/// their channel order.
pub const MAX_IN_FLIGHT: usize = 1024;

/// Why an event was not queued.
#[derive(Error, Debug)]
pub enum EmitError {
    /// The event could not be serialized or lacks a trip id or type
    #[error(transparent)]
    Event(#[from] EventError),

    /// The delivery task is gone
    #[error("Delivery channel closed")]
    Closed,
}

/// Sending half of the delivery channel.
#[derive(Debug, Clone)]
pub struct RideEventPublisher {
    tx: mpsc::UnboundedSender<SerializedEvent>,
}

impl RideEventPublisher {
    /// Create a publisher and the receiver its delivery task will drain.
    #[must_use]
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SerializedEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Serialize `event` and queue it for delivery. Never blocks.
    ///
    /// Failures are logged here; callers only need the result to count skips.
    ///
    /// # Errors
    ///
    /// - [`EmitError::Event`] if the event cannot be turned into a message
    /// - [`EmitError::Closed`] if the delivery task has stopped
    pub fn emit(&self, event: &RideEvent) -> Result<(), EmitError> {
        let message = SerializedEvent::from_event(event).map_err(|e| {
            tracing::warn!(
                trip_id = %event.trip_id,
                event_type = %event.event_type,
                error = %e,
                "Skipping event that cannot be serialized"
            );
            EmitError::Event(e)
        })?;

        self.tx.send(message).map_err(|_| {
            tracing::error!(trip_id = %event.trip_id, "Delivery task stopped; event dropped");
            EmitError::Closed
        })
    }
}

/// Totals reported by the delivery task when it finishes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryStats {
    /// Messages the bus accepted
    pub delivered: u64,
    /// Messages the bus rejected
    pub failed: u64,
}

/// Spawn the task that publishes queued messages to `topic`.
///
/// Messages are handed to the bus in channel order as soon as they arrive, so
/// per-trip order is kept while acknowledgement latency overlaps. The task ends
/// once every [`RideEventPublisher`] clone is dropped, the channel is empty and
/// every pending publish has resolved.
pub fn spawn_delivery_task(
    bus: Arc<dyn EventBus>,
    topic: String,
    rx: mpsc::UnboundedReceiver<SerializedEvent>,
) -> JoinHandle<DeliveryStats> {
    tokio::spawn(async move {
        let mut stats = DeliveryStats::default();

        let queued = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|message| (message, rx))
        });
        let mut deliveries = std::pin::pin!(
            queued
                .map(|message| {
                    let bus = Arc::clone(&bus);
                    let topic = topic.clone();
                    async move {
                        let result = bus.publish(&topic, &message).await;
                        (message, result)
                    }
                })
                .buffered(MAX_IN_FLIGHT)
        );

        while let Some((message, result)) = deliveries.next().await {
            match result {
                Ok(()) => {
                    stats.delivered += 1;
                    metrics::counter!(EVENTS_PUBLISHED).increment(1);
                    tracing::debug!(
                        trip_id = %message.key,
                        event_type = %message.event_type,
                        "Delivered ride event"
                    );
                },
                Err(e) => {
                    stats.failed += 1;
                    metrics::counter!(EVENTS_PUBLISH_FAILED).increment(1);
                    tracing::error!(
                        trip_id = %message.key,
                        event_type = %message.event_type,
                        error = %e,
                        "Failed to deliver ride event"
                    );
                },
            }
        }

        tracing::info!(
            delivered = stats.delivered,
            failed = stats.failed,
            "Delivery task finished"
        );
        stats
    })
}

/// Let the delivery task drain, then flush `bus`, both within one `budget`.
///
/// Every [`RideEventPublisher`] must be dropped first or the task never
/// finishes. The flush gets whatever part of `budget` the drain left over.
/// Returns the task's totals if it finished in time.
pub async fn drain_and_flush(
    delivery: JoinHandle<DeliveryStats>,
    bus: &dyn EventBus,
    budget: Duration,
) -> Option<DeliveryStats> {
    let deadline = Instant::now() + budget;

    let stats = match tokio::time::timeout_at(deadline, delivery).await {
        Ok(Ok(stats)) => {
            tracing::info!(
                delivered = stats.delivered,
                failed = stats.failed,
                "Delivery queue drained"
            );
            Some(stats)
        },
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Delivery task failed");
            None
        },
        Err(_) => {
            tracing::warn!(
                budget_ms = u64::try_from(budget.as_millis()).unwrap_or(u64::MAX),
                "Delivery queue not drained before timeout; remaining events dropped"
            );
            None
        },
    };

    let remaining = deadline.saturating_duration_since(Instant::now());
    if let Err(e) = bus.flush(remaining) {
        tracing::warn!(error = %e, "Producer flush incomplete");
    }
    stats
}
