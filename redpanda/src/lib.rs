//! Redpanda event bus for the rideshare pipeline.
//!
//! This crate implements the [`EventBus`] trait from `rideshare-core` with
//! rdkafka, so it works against Redpanda or any other Kafka-compatible broker.
//!
//! # Record Layout
//!
//! Every [`SerializedEvent`] becomes one Kafka record:
//!
//! | Part    | Content                                   |
//! |---------|-------------------------------------------|
//! | key     | `event.key` (the trip id)                 |
//! | value   | `event.data` (the JSON envelope, as is)   |
//! | header  | `event-type: <event.event_type>`          |
//!
//! Keying by trip id sends all events of one ride to the same partition, so
//! they are consumed in the order they were produced.
//!
//! # Delivery Semantics
//!
//! **At-least-once delivery** with manual offset commits:
//! - The subscription stream owns its consumer; there is no read-ahead buffer
//! - A record's offset is committed when the subscriber polls for the next
//!   item, so a subscriber that handles one item at a time has finished with
//!   it by then
//! - The last record handed out before a crash or shutdown is never committed
//!   and is redelivered on restart
//! - The sink is idempotent on `(trip_id, event_type)`, so redelivery is harmless
//!
//! # Example
//!
//! ```no_run
//! use rideshare_core::event_bus::EventBus;
//! use rideshare_core::event::SerializedEvent;
//! use rideshare_redpanda::RedpandaEventBus;
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let event_bus = RedpandaEventBus::new("localhost:9092")?;
//!
//! let event = SerializedEvent::new(
//!     "trip-1".to_string(),
//!     "ACCEPTED".to_string(),
//!     br#"{"trip_id":"trip-1"}"#.to_vec(),
//! );
//! event_bus.publish("ride-events", &event).await?;
//!
//! let mut stream = event_bus.subscribe(&["ride-events"]).await?;
//! while let Some(result) = stream.next().await {
//!     match result {
//!         Ok(event) => println!("Received: {}", event.event_type),
//!         Err(e) => eprintln!("Error: {e}"),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use futures::StreamExt;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaResult;
use rdkafka::message::{BorrowedMessage, Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use rideshare_core::event::SerializedEvent;
use rideshare_core::event_bus::{EventBus, EventBusError, EventStream};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Name of the record header that carries the event type.
pub const EVENT_TYPE_HEADER: &str = "event-type";

const DEFAULT_ACKS: &str = "1";
const DEFAULT_COMPRESSION: &str = "none";
const DEFAULT_OFFSET_RESET: &str = "earliest";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Redpanda event bus implementation.
///
/// Owns one `FutureProducer` for publishing. Each call to
/// [`subscribe`](EventBus::subscribe) creates its own `StreamConsumer` in the
/// configured consumer group.
///
/// # Example
///
/// ```no_run
/// use rideshare_redpanda::RedpandaEventBus;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let event_bus = RedpandaEventBus::builder()
///     .brokers("redpanda:9092")
///     .producer_acks("all")
///     .consumer_group("ride-consumer-group")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaEventBus {
    /// Kafka producer for publishing events
    producer: FutureProducer,
    /// Broker addresses (for creating consumers)
    brokers: String,
    /// Producer timeout
    timeout: Duration,
    /// Consumer group ID (if explicitly set)
    consumer_group: Option<String>,
    /// Auto offset reset policy
    auto_offset_reset: String,
}

impl RedpandaEventBus {
    /// Create a new Redpanda event bus with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if the producer cannot be
    /// created from the given broker list.
    pub fn new(brokers: &str) -> Result<Self, EventBusError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a new builder for configuring the event bus.
    #[must_use]
    pub fn builder() -> RedpandaEventBusBuilder {
        RedpandaEventBusBuilder::default()
    }

    /// Get a reference to the brokers string.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    fn group_id_for(&self, topics: &[String]) -> String {
        self.consumer_group.clone().unwrap_or_else(|| {
            // Sort topics for deterministic consumer group naming
            let mut sorted = topics.to_vec();
            sorted.sort();
            format!("rideshare-{}", sorted.join("-"))
        })
    }
}

/// Builder for configuring a [`RedpandaEventBus`].
///
/// # Example
///
/// ```no_run
/// use rideshare_redpanda::RedpandaEventBus;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let event_bus = RedpandaEventBus::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .producer_acks("all")
///     .compression("lz4")
///     .timeout(Duration::from_secs(10))
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct RedpandaEventBusBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    consumer_group: Option<String>,
    auto_offset_reset: Option<String>,
}

impl RedpandaEventBusBuilder {
    /// Set the broker addresses (comma-separated, e.g. `"redpanda:9092"`).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the producer acknowledgment mode: `"0"`, `"1"`, or `"all"`.
    ///
    /// Default: `"1"`
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec: `"none"`, `"gzip"`, `"snappy"`, `"lz4"`, `"zstd"`.
    ///
    /// Default: `"none"`
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set the producer send timeout.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the consumer group ID for subscriptions.
    ///
    /// If not set, the group is derived from the subscribed topics.
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Set where a new consumer group starts reading: `"earliest"`, `"latest"`,
    /// or `"error"`.
    ///
    /// Default: `"earliest"`
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the [`RedpandaEventBus`].
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if:
    /// - Brokers not set
    /// - Cannot create producer
    /// - Invalid configuration
    pub fn build(self) -> Result<RedpandaEventBus, EventBusError> {
        let brokers = self.brokers.ok_or_else(|| {
            EventBusError::ConnectionFailed("Brokers not configured".to_string())
        })?;
        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT);
        let acks = self.producer_acks.as_deref().unwrap_or(DEFAULT_ACKS);
        let compression = self.compression.as_deref().unwrap_or(DEFAULT_COMPRESSION);

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", timeout.as_millis().to_string())
            .set("acks", acks)
            .set("compression.type", compression)
            .create()
            .map_err(|e| {
                EventBusError::ConnectionFailed(format!("Failed to create producer: {e}"))
            })?;

        let auto_offset_reset = self
            .auto_offset_reset
            .unwrap_or_else(|| DEFAULT_OFFSET_RESET.to_string());

        tracing::info!(
            brokers = %brokers,
            acks,
            compression,
            auto_offset_reset = %auto_offset_reset,
            "RedpandaEventBus created"
        );

        Ok(RedpandaEventBus {
            producer,
            brokers,
            timeout,
            consumer_group: self.consumer_group,
            auto_offset_reset,
        })
    }
}

/// Turn a received record back into a [`SerializedEvent`].
///
/// The key and the `event-type` header are optional; the envelope in the value
/// is the source of truth and missing parts become empty strings.
fn event_from_message(message: &BorrowedMessage<'_>) -> Result<SerializedEvent, EventBusError> {
    let Some(payload) = message.payload() else {
        return Err(EventBusError::DeserializationFailed(
            "Message has no payload".to_string(),
        ));
    };

    let key = message
        .key()
        .map(|k| String::from_utf8_lossy(k).into_owned())
        .unwrap_or_default();

    let event_type = message
        .headers()
        .and_then(|headers| {
            headers
                .iter()
                .find(|h| h.key == EVENT_TYPE_HEADER)
                .and_then(|h| h.value)
                .map(|v| String::from_utf8_lossy(v).into_owned())
        })
        .unwrap_or_default();

    Ok(SerializedEvent::new(key, event_type, payload.to_vec()))
}

/// Position of the record handed to the subscriber most recently.
///
/// It is only committed once the subscriber asks for the next item.
#[derive(Debug, Default)]
struct HandedOff {
    position: Option<(String, i32, i64)>,
}

impl HandedOff {
    fn record(&mut self, topic: &str, partition: i32, offset: i64) {
        self.position = Some((topic.to_string(), partition, offset));
    }

    fn take(&mut self) -> Option<(String, i32, i64)> {
        self.position.take()
    }
}

/// Offsets that mark `offset` on `topic`/`partition` as consumed.
fn commit_list(topic: &str, partition: i32, offset: i64) -> KafkaResult<TopicPartitionList> {
    let mut list = TopicPartitionList::new();
    list.add_partition_offset(topic, partition, Offset::Offset(offset + 1))?;
    Ok(list)
}

fn commit_handled(consumer: &StreamConsumer, topic: &str, partition: i32, offset: i64) {
    let result = commit_list(topic, partition, offset)
        .and_then(|list| consumer.commit(&list, CommitMode::Async));

    if let Err(e) = result {
        tracing::warn!(
            topic,
            partition,
            offset,
            error = %e,
            "Failed to commit offset (message may be redelivered)"
        );
    }
}

impl EventBus for RedpandaEventBus {
    fn publish(
        &self,
        topic: &str,
        event: &SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        let topic = topic.to_string();
        let event = event.clone();
        let timeout = self.timeout;

        Box::pin(async move {
            let headers = OwnedHeaders::new().insert(Header {
                key: EVENT_TYPE_HEADER,
                value: Some(event.event_type.as_bytes()),
            });

            let record = FutureRecord::to(&topic)
                .key(event.key.as_bytes())
                .payload(&event.data)
                .headers(headers);

            match self.producer.send(record, Timeout::After(timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %topic,
                        partition,
                        offset,
                        trip_id = %event.key,
                        event_type = %event.event_type,
                        "Event published"
                    );
                    Ok(())
                },
                Err((kafka_error, _)) => {
                    tracing::error!(
                        topic = %topic,
                        trip_id = %event.key,
                        error = %kafka_error,
                        "Failed to publish event"
                    );
                    Err(EventBusError::PublishFailed {
                        topic,
                        reason: kafka_error.to_string(),
                    })
                },
            }
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>> {
        let topics: Vec<String> = topics.iter().map(|s| (*s).to_string()).collect();
        let consumer_group_id = self.group_id_for(&topics);
        let brokers = self.brokers.clone();
        let auto_offset_reset = self.auto_offset_reset.clone();

        Box::pin(async move {
            // Manual commit for at-least-once
            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &brokers)
                .set("group.id", &consumer_group_id)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", &auto_offset_reset)
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| EventBusError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("Failed to create consumer: {e}"),
                })?;

            let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
            consumer
                .subscribe(&topic_refs)
                .map_err(|e| EventBusError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("Failed to subscribe to topics: {e}"),
                })?;

            tracing::info!(
                topics = ?topics,
                consumer_group = %consumer_group_id,
                auto_offset_reset = %auto_offset_reset,
                "Subscribed to topics"
            );

            // The stream owns the consumer, so nothing is read ahead of the subscriber
            let stream = async_stream::stream! {
                let consumer = consumer;
                let mut handed_off = HandedOff::default();
                let mut messages = consumer.stream();

                loop {
                    // Polled again: the previous record has been handled
                    if let Some((topic, partition, offset)) = handed_off.take() {
                        commit_handled(&consumer, &topic, partition, offset);
                    }

                    let Some(next) = messages.next().await else {
                        break;
                    };

                    let item = match next {
                        Ok(message) => {
                            let event_result = event_from_message(&message);
                            if let Ok(event) = &event_result {
                                tracing::trace!(
                                    topic = message.topic(),
                                    partition = message.partition(),
                                    offset = message.offset(),
                                    trip_id = %event.key,
                                    event_type = %event.event_type,
                                    "Received event"
                                );
                            }
                            handed_off.record(message.topic(), message.partition(), message.offset());
                            event_result
                        },
                        Err(e) => Err(EventBusError::TransportError(format!(
                            "Failed to receive message: {e}"
                        ))),
                    };

                    yield item;
                }

                tracing::debug!("Consumer stream ended");
            };

            Ok(Box::pin(stream) as EventStream)
        })
    }

    fn flush(&self, timeout: Duration) -> Result<(), EventBusError> {
        self.producer
            .flush(Timeout::After(timeout))
            .map_err(|e| EventBusError::FlushFailed(e.to_string()))?;

        tracing::info!(in_flight = self.producer.in_flight_count(), "Producer flushed");
        Ok(())
    }
}
