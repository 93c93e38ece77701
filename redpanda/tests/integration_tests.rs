//! Integration tests for [`RedpandaEventBus`] with a real Kafka instance.
//!
//! # Running These Tests
//!
//! These tests are marked as `#[ignore]` by default because they:
//! - Require Docker to be running (for testcontainers)
//! - Take 15-60 seconds per test to spin up Kafka
//! - Can be flaky due to Kafka's distributed nature and timing
//!
//! To run explicitly:
//! ```bash
//! cargo test -p rideshare-redpanda --test integration_tests -- --ignored
//! ```

#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use futures::StreamExt;
use rideshare_core::environment::Clock;
use rideshare_core::event::{RideEventType, SerializedEvent};
use rideshare_core::event_bus::EventBus;
use rideshare_redpanda::RedpandaEventBus;
use rideshare_testing::{completed_ride, ride_event, test_clock};
use std::time::Duration;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::kafka::{KAFKA_PORT, Kafka};

const WARMUP_KEY: &str = "warmup";

fn warmup_event() -> SerializedEvent {
    SerializedEvent::new(WARMUP_KEY.to_string(), "WARMUP".to_string(), b"{}".to_vec())
}

/// Start Kafka and return the container with its broker address.
async fn start_kafka() -> (ContainerAsync<Kafka>, String) {
    let kafka = Kafka::default()
        .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "true")
        .start()
        .await
        .expect("Failed to start Kafka container");

    let host = kafka.get_host().await.expect("Failed to get host");
    let port = kafka
        .get_host_port_ipv4(KAFKA_PORT)
        .await
        .expect("Failed to get port");
    (kafka, format!("{host}:{port}"))
}

/// Publish a warmup record until the topic exists and metadata has propagated.
async fn ensure_topic_exists(event_bus: &RedpandaEventBus, topic: &str) {
    for attempt in 1..=60 {
        if event_bus.publish(topic, &warmup_event()).await.is_ok() {
            tokio::time::sleep(Duration::from_secs(3)).await;
            return;
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(attempt != 60, "Failed to create topic {topic}");
    }
}

/// Read `count` non-warmup events from the stream, failing after 15 seconds.
async fn receive(
    stream: &mut rideshare_core::event_bus::EventStream,
    count: usize,
) -> Vec<SerializedEvent> {
    let mut received = Vec::new();
    tokio::time::timeout(Duration::from_secs(15), async {
        while received.len() < count {
            match stream.next().await {
                Some(Ok(event)) if event.key != WARMUP_KEY => received.push(event),
                Some(Ok(_)) => {},
                Some(Err(e)) => panic!("stream error: {e}"),
                None => panic!("stream ended early"),
            }
        }
    })
    .await
    .expect("Timeout waiting for events");
    received
}

#[tokio::test]
#[ignore]
async fn ride_event_survives_the_broker() {
    let (_kafka, brokers) = start_kafka().await;
    let event_bus = RedpandaEventBus::builder()
        .brokers(&brokers)
        .consumer_group("round-trip-test")
        .build()
        .expect("Failed to create event bus");
    ensure_topic_exists(&event_bus, "ride-events").await;

    let original = ride_event("trip-42", RideEventType::TripCompleted, test_clock().now());
    let message = SerializedEvent::from_event(&original).expect("serialize");
    event_bus
        .publish("ride-events", &message)
        .await
        .expect("Failed to publish");

    let mut stream = event_bus
        .subscribe(&["ride-events"])
        .await
        .expect("Failed to subscribe");
    let received = receive(&mut stream, 1).await;

    assert_eq!(received[0].key, "trip-42");
    assert_eq!(received[0].event_type, "COMPLETED");
    assert_eq!(received[0].decode().expect("decode"), original);
}

#[tokio::test]
#[ignore]
async fn events_of_one_trip_keep_their_order() {
    let (_kafka, brokers) = start_kafka().await;
    let event_bus = RedpandaEventBus::builder()
        .brokers(&brokers)
        .consumer_group("ordering-test")
        .build()
        .expect("Failed to create event bus");
    ensure_topic_exists(&event_bus, "ride-events").await;

    let ride = completed_ride("trip-7", test_clock().now());
    for event in &ride {
        let message = SerializedEvent::from_event(event).expect("serialize");
        event_bus
            .publish("ride-events", &message)
            .await
            .expect("Failed to publish");
    }

    let mut stream = event_bus
        .subscribe(&["ride-events"])
        .await
        .expect("Failed to subscribe");
    let received = receive(&mut stream, ride.len()).await;

    let types: Vec<&str> = received.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(types, vec!["REQUESTED", "ACCEPTED", "STARTED", "COMPLETED"]);
}

#[tokio::test]
#[ignore]
async fn flush_returns_once_messages_are_delivered() {
    let (_kafka, brokers) = start_kafka().await;
    let event_bus = RedpandaEventBus::new(&brokers).expect("Failed to create event bus");
    ensure_topic_exists(&event_bus, "ride-events").await;

    event_bus
        .flush(Duration::from_secs(5))
        .expect("flush should succeed with nothing in flight");
}

#[tokio::test]
#[ignore]
async fn unhandled_record_is_redelivered_to_the_group() {
    let (_kafka, brokers) = start_kafka().await;
    let event_bus = RedpandaEventBus::builder()
        .brokers(&brokers)
        .consumer_group("commit-test")
        .build()
        .expect("Failed to create event bus");
    ensure_topic_exists(&event_bus, "ride-events").await;

    for trip in ["trip-1", "trip-2", "trip-3"] {
        let event = ride_event(trip, RideEventType::RideRequested, test_clock().now());
        let message = SerializedEvent::from_event(&event).expect("serialize");
        event_bus
            .publish("ride-events", &message)
            .await
            .expect("Failed to publish");
    }

    // Take trip-1 and trip-2; only trip-1 is committed, by the poll that yields trip-2
    let mut first = event_bus
        .subscribe(&["ride-events"])
        .await
        .expect("Failed to subscribe");
    let received = receive(&mut first, 2).await;
    assert_eq!(received[1].key, "trip-2");
    tokio::time::sleep(Duration::from_secs(1)).await;
    drop(first);

    let mut second = event_bus
        .subscribe(&["ride-events"])
        .await
        .expect("Failed to resubscribe");
    let redelivered = receive(&mut second, 2).await;

    let keys: Vec<&str> = redelivered.iter().map(|e| e.key.as_str()).collect();
    assert_eq!(keys, vec!["trip-2", "trip-3"]);
}
