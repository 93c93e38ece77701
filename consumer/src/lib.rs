//! # Rideshare Consumer
//!
//! Reads ride events from the event bus and stores each one through a
//! [`RideEventSink`].
//!
//! Messages are handled one at a time, and the next one is only requested
//! once the current one has been stored or given up on. The event bus relies
//! on that to commit a record's offset only after it has been handled. A
//! message that cannot be decoded or stored is logged, counted, and skipped;
//! the loop only stops on shutdown or when the subscription ends. Redelivered events are absorbed by the sink's
//! `(trip_id, event_type)` conflict rule.

pub mod config;

pub use config::{Config, DatabaseConfig};

use futures::StreamExt;
use rideshare_core::event::SerializedEvent;
use rideshare_core::event_bus::{EventBus, EventBusError};
use rideshare_core::metrics::{EVENTS_DUPLICATES, EVENTS_PERSISTED, EVENTS_REJECTED};
use rideshare_core::sink::{InsertOutcome, RideEventRecord, RideEventSink};
use tokio::sync::watch;

/// Totals for one consumer run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerStats {
    /// Messages taken off the stream
    pub received: u64,
    /// New rows written
    pub persisted: u64,
    /// Deliveries the sink already had
    pub duplicates: u64,
    /// Messages that did not decode into a ride event
    pub rejected: u64,
    /// Messages the sink failed to store
    pub failed: u64,
    /// Errors reported by the transport itself
    pub transport_errors: u64,
}

/// What happened to one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Handled {
    Stored(InsertOutcome),
    Rejected,
    Failed,
}

/// Subscribe to `topic` and store every event until `shutdown` turns `true` or
/// the stream ends.
///
/// # Errors
///
/// Returns [`EventBusError::SubscriptionFailed`] if the subscription cannot be
/// created. Errors after that point are logged and counted, never returned.
pub async fn run_consumer(
    bus: &dyn EventBus,
    sink: &dyn RideEventSink,
    topic: &str,
    mut shutdown: watch::Receiver<bool>,
) -> Result<ConsumerStats, EventBusError> {
    let mut stream = bus.subscribe(&[topic]).await?;
    let mut stats = ConsumerStats::default();

    tracing::info!(topic, "Consumer started");

    while !*shutdown.borrow() {
        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }

            next = stream.next() => {
                let Some(result) = next else {
                    tracing::info!(topic, "Subscription ended");
                    break;
                };

                match result {
                    Ok(message) => {
                        stats.received += 1;
                        match handle_message(sink, &message).await {
                            Handled::Stored(InsertOutcome::Inserted) => stats.persisted += 1,
                            Handled::Stored(InsertOutcome::Duplicate) => stats.duplicates += 1,
                            Handled::Rejected => stats.rejected += 1,
                            Handled::Failed => stats.failed += 1,
                        }
                    },
                    Err(e) => {
                        stats.transport_errors += 1;
                        metrics::counter!(EVENTS_REJECTED).increment(1);
                        tracing::warn!(topic, error = %e, "Error receiving from event bus");
                    },
                }
            }
        }
    }

    tracing::info!(
        received = stats.received,
        persisted = stats.persisted,
        duplicates = stats.duplicates,
        rejected = stats.rejected,
        failed = stats.failed,
        transport_errors = stats.transport_errors,
        "Consumer stopped"
    );
    Ok(stats)
}

async fn handle_message(sink: &dyn RideEventSink, message: &SerializedEvent) -> Handled {
    let event = match message.decode() {
        Ok(event) => event,
        Err(e) => {
            metrics::counter!(EVENTS_REJECTED).increment(1);
            tracing::warn!(
                key = %message.key,
                event_type = %message.event_type,
                bytes = message.data.len(),
                error = %e,
                "Dropping message that is not a ride event"
            );
            return Handled::Rejected;
        },
    };

    if !message.key.is_empty() && message.key != event.trip_id {
        tracing::warn!(
            key = %message.key,
            trip_id = %event.trip_id,
            "Message key does not match trip id"
        );
    }

    let record = match RideEventRecord::from_event(&event) {
        Ok(record) => record,
        Err(e) => {
            metrics::counter!(EVENTS_REJECTED).increment(1);
            tracing::warn!(trip_id = %event.trip_id, error = %e, "Cannot build row for event");
            return Handled::Rejected;
        },
    };

    match sink.insert_ride_event(&record).await {
        Ok(InsertOutcome::Inserted) => {
            metrics::counter!(EVENTS_PERSISTED).increment(1);
            tracing::info!(
                trip_id = %record.trip_id,
                event_type = %record.event_type,
                state = %record.event_state,
                "Stored ride event"
            );
            Handled::Stored(InsertOutcome::Inserted)
        },
        Ok(InsertOutcome::Duplicate) => {
            metrics::counter!(EVENTS_DUPLICATES).increment(1);
            tracing::debug!(
                trip_id = %record.trip_id,
                event_type = %record.event_type,
                "Ignored duplicate ride event"
            );
            Handled::Stored(InsertOutcome::Duplicate)
        },
        Err(e) => {
            metrics::counter!(EVENTS_REJECTED).increment(1);
            tracing::error!(
                trip_id = %record.trip_id,
                event_type = %record.event_type,
                error = %e,
                "Failed to store ride event"
            );
            Handled::Failed
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use rideshare_core::environment::Clock;
    use rideshare_core::event::RideEventType;
    use rideshare_core::event_bus::EventStream;
    use rideshare_testing::{
        InMemoryEventBus, InMemoryRideEventSink, completed_ride, ride_event, test_clock,
    };
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::{Arc, Mutex};

    const TOPIC: &str = "ride-events";

    async fn publish(bus: &InMemoryEventBus, message: &SerializedEvent) {
        bus.publish(TOPIC, message).await.unwrap();
    }

    async fn publish_event(bus: &InMemoryEventBus, event: &rideshare_core::event::RideEvent) {
        publish(bus, &SerializedEvent::from_event(event).unwrap()).await;
    }

    /// Run the consumer over everything already published, then end the stream.
    async fn drain(bus: &InMemoryEventBus, sink: &InMemoryRideEventSink) -> ConsumerStats {
        let (_stop_tx, stop_rx) = watch::channel(false);
        let closer = bus.clone();
        let run = run_consumer(bus, sink, TOPIC, stop_rx);
        let (stats, ()) = tokio::join!(run, async move {
            tokio::task::yield_now().await;
            closer.close();
        });
        stats.unwrap()
    }

    #[tokio::test]
    async fn stores_every_event_of_a_ride() {
        let bus = InMemoryEventBus::new();
        let sink = InMemoryRideEventSink::new();
        for event in completed_ride("trip-1", test_clock().now()) {
            publish_event(&bus, &event).await;
        }

        let stats = drain(&bus, &sink).await;

        assert_eq!(stats.received, 4);
        assert_eq!(stats.persisted, 4);
        assert_eq!(sink.trip_events("trip-1").len(), 4);
    }

    #[tokio::test]
    async fn redelivered_events_are_stored_once() {
        let bus = InMemoryEventBus::new();
        let sink = InMemoryRideEventSink::new();
        let event = ride_event("trip-1", RideEventType::RideAccepted, test_clock().now());
        publish_event(&bus, &event).await;
        publish_event(&bus, &event).await;

        let stats = drain(&bus, &sink).await;

        assert_eq!(stats.persisted, 1);
        assert_eq!(stats.duplicates, 1);
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test]
    async fn bad_messages_are_skipped_and_the_loop_continues() {
        let bus = InMemoryEventBus::new();
        let sink = InMemoryRideEventSink::new();

        publish(
            &bus,
            &SerializedEvent::new("trip-x".into(), "ACCEPTED".into(), b"not json".to_vec()),
        )
        .await;

        // Known type with a null payload
        let mut envelope = serde_json::to_value(ride_event(
            "trip-y",
            RideEventType::TripStarted,
            test_clock().now(),
        ))
        .unwrap();
        envelope["payload"] = serde_json::Value::Null;
        publish(
            &bus,
            &SerializedEvent::new(
                "trip-y".into(),
                "STARTED".into(),
                serde_json::to_vec(&envelope).unwrap(),
            ),
        )
        .await;

        publish_event(
            &bus,
            &ride_event("trip-z", RideEventType::RideRequested, test_clock().now()),
        )
        .await;

        let stats = drain(&bus, &sink).await;

        assert_eq!(stats.received, 3);
        assert_eq!(stats.rejected, 2);
        assert_eq!(stats.persisted, 1);
        assert!(sink.get("trip-z", "REQUESTED").is_some());
    }

    #[tokio::test]
    async fn unrecognized_types_are_stored_with_null_payload() {
        let bus = InMemoryEventBus::new();
        let sink = InMemoryRideEventSink::new();

        let mut envelope = serde_json::to_value(ride_event(
            "trip-1",
            RideEventType::TripStarted,
            test_clock().now(),
        ))
        .unwrap();
        envelope["type"] = serde_json::Value::from("REROUTED");
        publish(
            &bus,
            &SerializedEvent::new(
                "trip-1".into(),
                "REROUTED".into(),
                serde_json::to_vec(&envelope).unwrap(),
            ),
        )
        .await;

        let stats = drain(&bus, &sink).await;

        assert_eq!(stats.persisted, 1);
        let row = sink.get("trip-1", "REROUTED").unwrap();
        assert_eq!(row.payload, b"null");
    }

    #[tokio::test]
    async fn sink_failures_are_counted_and_do_not_stop_the_loop() {
        let bus = InMemoryEventBus::new();
        let sink = InMemoryRideEventSink::new();
        sink.fail_inserts(true);
        for event in completed_ride("trip-1", test_clock().now()) {
            publish_event(&bus, &event).await;
        }

        let stats = drain(&bus, &sink).await;

        assert_eq!(stats.received, 4);
        assert_eq!(stats.failed, 4);
        assert_eq!(sink.attempts(), 4);
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn transport_errors_are_counted() {
        let bus = InMemoryEventBus::new();
        let sink = InMemoryRideEventSink::new();
        let (_stop_tx, stop_rx) = watch::channel(false);

        let producer = bus.clone();
        let (stats, ()) = tokio::join!(run_consumer(&bus, &sink, TOPIC, stop_rx), async move {
            tokio::task::yield_now().await;
            producer.inject_error(TOPIC, EventBusError::TransportError("reset".to_string()));
            let event = ride_event("trip-1", RideEventType::RideRequested, test_clock().now());
            producer
                .publish(TOPIC, &SerializedEvent::from_event(&event).unwrap())
                .await
                .unwrap();
            producer.close();
        });

        let stats = stats.unwrap();
        assert_eq!(stats.transport_errors, 1);
        assert_eq!(stats.persisted, 1);
    }

    /// Bus whose subscription records how many inserts the sink had seen each
    /// time the consumer pulled the next message.
    struct PullRecordingBus {
        messages: Vec<SerializedEvent>,
        sink: InMemoryRideEventSink,
        pulls: Arc<Mutex<Vec<usize>>>,
    }

    impl EventBus for PullRecordingBus {
        fn publish(
            &self,
            _topic: &str,
            _event: &SerializedEvent,
        ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
            Box::pin(async { Ok(()) })
        }

        fn subscribe(
            &self,
            _topics: &[&str],
        ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>> {
            let sink = self.sink.clone();
            let pulls = Arc::clone(&self.pulls);
            let stream = futures::stream::iter(self.messages.clone()).map(move |message| {
                pulls.lock().unwrap().push(sink.attempts());
                Ok(message)
            });
            Box::pin(async move { Ok(Box::pin(stream) as EventStream) })
        }
    }

    #[tokio::test]
    async fn next_message_is_pulled_only_after_the_current_one_is_stored() {
        let sink = InMemoryRideEventSink::new();
        let messages = completed_ride("trip-1", test_clock().now())
            .iter()
            .map(|event| SerializedEvent::from_event(event).unwrap())
            .collect();
        let bus = PullRecordingBus {
            messages,
            sink: sink.clone(),
            pulls: Arc::default(),
        };
        let (_stop_tx, stop_rx) = watch::channel(false);

        let stats = run_consumer(&bus, &sink, TOPIC, stop_rx).await.unwrap();

        assert_eq!(stats.persisted, 4);
        assert_eq!(*bus.pulls.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn shutdown_stops_an_idle_consumer() {
        let bus = InMemoryEventBus::new();
        let sink = InMemoryRideEventSink::new();
        let (stop_tx, stop_rx) = watch::channel(false);

        let (stats, ()) = tokio::join!(run_consumer(&bus, &sink, TOPIC, stop_rx), async move {
            tokio::task::yield_now().await;
            stop_tx.send(true).unwrap();
        });

        assert_eq!(stats.unwrap(), ConsumerStats::default());
    }
}
