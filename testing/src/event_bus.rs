//! In-memory [`EventBus`] for tests.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Lock poisoning only follows a panicking test

use futures::channel::mpsc::{UnboundedSender, unbounded};
use rideshare_core::event::SerializedEvent;
use rideshare_core::event_bus::{EventBus, EventBusError, EventStream};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Subscriber = UnboundedSender<Result<SerializedEvent, EventBusError>>;

#[derive(Default)]
struct BusState {
    published: Vec<(String, SerializedEvent)>,
    subscribers: HashMap<String, Vec<Subscriber>>,
    fail_publishes: bool,
    publish_delay: Duration,
    flushes: Vec<Duration>,
}

/// Event bus that keeps everything in memory.
///
/// Every successful publish is recorded and forwarded to the subscribers of
/// that topic. A new subscription first replays what the topic already holds,
/// like a consumer group starting from the earliest offset. Streams end when
/// [`close`](Self::close) is called.
///
/// A publish is recorded as soon as it is first polled; with
/// [`publish_delay`](Self::publish_delay) set, the returned future then waits
/// before resolving, like a broker acknowledgement.
///
/// # Example
///
/// ```
/// use rideshare_core::event::SerializedEvent;
/// use rideshare_core::event_bus::EventBus;
/// use rideshare_testing::InMemoryEventBus;
///
/// # tokio_test::block_on(async {
/// let bus = InMemoryEventBus::new();
/// let event = SerializedEvent::new("trip-1".into(), "ACCEPTED".into(), b"{}".to_vec());
/// bus.publish("ride-events", &event).await.unwrap();
/// assert_eq!(bus.published("ride-events"), vec![event]);
/// # });
/// ```
#[derive(Clone, Default)]
pub struct InMemoryEventBus {
    state: Arc<Mutex<BusState>>,
}

impl InMemoryEventBus {
    /// Create an empty bus
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages published to `topic`, in publish order
    #[must_use]
    pub fn published(&self, topic: &str) -> Vec<SerializedEvent> {
        self.state
            .lock()
            .unwrap()
            .published
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, event)| event.clone())
            .collect()
    }

    /// Total number of successful publishes across all topics
    #[must_use]
    pub fn publish_count(&self) -> usize {
        self.state.lock().unwrap().published.len()
    }

    /// Make every following publish fail with `PublishFailed` (or succeed again)
    pub fn fail_publishes(&self, fail: bool) {
        self.state.lock().unwrap().fail_publishes = fail;
    }

    /// Delay every following publish acknowledgement by `delay`
    pub fn publish_delay(&self, delay: Duration) {
        self.state.lock().unwrap().publish_delay = delay;
    }

    /// Deliver an error to the subscribers of `topic`, as a broken transport would
    pub fn inject_error(&self, topic: &str, error: EventBusError) {
        let mut state = self.state.lock().unwrap();
        if let Some(subscribers) = state.subscribers.get_mut(topic) {
            subscribers.retain(|tx| tx.unbounded_send(Err(error.clone())).is_ok());
        }
    }

    /// Number of `flush` calls seen
    #[must_use]
    pub fn flush_count(&self) -> usize {
        self.state.lock().unwrap().flushes.len()
    }

    /// Timeout passed to each `flush` call, in call order
    #[must_use]
    pub fn flush_timeouts(&self) -> Vec<Duration> {
        self.state.lock().unwrap().flushes.clone()
    }

    /// End every open subscription stream
    pub fn close(&self) {
        self.state.lock().unwrap().subscribers.clear();
    }
}

impl EventBus for InMemoryEventBus {
    fn publish(
        &self,
        topic: &str,
        event: &SerializedEvent,
    ) -> Pin<Box<dyn Future<Output = Result<(), EventBusError>> + Send + '_>> {
        let topic = topic.to_string();
        let event = event.clone();

        Box::pin(async move {
            let delay = {
                let mut state = self.state.lock().unwrap();
                if state.fail_publishes {
                    return Err(EventBusError::PublishFailed {
                        topic,
                        reason: "publishing disabled for this test".to_string(),
                    });
                }

                if let Some(subscribers) = state.subscribers.get_mut(&topic) {
                    subscribers.retain(|tx| tx.unbounded_send(Ok(event.clone())).is_ok());
                }
                state.published.push((topic, event));
                state.publish_delay
            };

            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok(())
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<EventStream, EventBusError>> + Send + '_>> {
        let topics: Vec<String> = topics.iter().map(|t| (*t).to_string()).collect();

        Box::pin(async move {
            if topics.is_empty() {
                return Err(EventBusError::SubscriptionFailed {
                    topics,
                    reason: "no topics given".to_string(),
                });
            }

            let (tx, rx) = unbounded();
            let mut state = self.state.lock().unwrap();
            for (topic, event) in &state.published {
                if topics.contains(topic) {
                    let _ = tx.unbounded_send(Ok(event.clone()));
                }
            }
            for topic in topics {
                state.subscribers.entry(topic).or_default().push(tx.clone());
            }
            Ok(Box::pin(rx) as EventStream)
        })
    }

    fn flush(&self, timeout: Duration) -> Result<(), EventBusError> {
        self.state.lock().unwrap().flushes.push(timeout);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn message(key: &str) -> SerializedEvent {
        SerializedEvent::new(key.to_string(), "ACCEPTED".to_string(), b"{}".to_vec())
    }

    #[tokio::test]
    async fn subscribers_replay_then_follow_in_order() {
        let bus = InMemoryEventBus::new();
        bus.publish("ride-events", &message("before")).await.unwrap();

        let stream = bus.subscribe(&["ride-events"]).await.unwrap();
        bus.publish("ride-events", &message("a")).await.unwrap();
        bus.publish("other", &message("x")).await.unwrap();
        bus.publish("ride-events", &message("b")).await.unwrap();
        bus.close();

        let keys: Vec<String> = stream.map(|r| r.expect("ok").key).collect().await;
        assert_eq!(keys, vec!["before", "a", "b"]);
        assert_eq!(bus.published("ride-events").len(), 3);
    }

    #[tokio::test]
    async fn failing_bus_records_nothing() {
        let bus = InMemoryEventBus::new();
        bus.fail_publishes(true);

        let result = bus.publish("ride-events", &message("a")).await;
        assert!(matches!(result, Err(EventBusError::PublishFailed { .. })));
        assert_eq!(bus.publish_count(), 0);

        bus.fail_publishes(false);
        bus.publish("ride-events", &message("a")).await.unwrap();
        assert_eq!(bus.publish_count(), 1);
    }

    #[tokio::test]
    async fn injected_errors_reach_subscribers() {
        let bus = InMemoryEventBus::new();
        let mut stream = bus.subscribe(&["ride-events"]).await.unwrap();

        bus.inject_error(
            "ride-events",
            EventBusError::TransportError("broker went away".to_string()),
        );

        let next = stream.next().await.expect("an item");
        assert!(matches!(next, Err(EventBusError::TransportError(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_publish_is_recorded_before_it_resolves() {
        let bus = InMemoryEventBus::new();
        bus.publish_delay(Duration::from_millis(20));

        let mut pending = bus.publish("ride-events", &message("a"));
        assert!(futures::poll!(pending.as_mut()).is_pending());
        assert_eq!(bus.publish_count(), 1);

        pending.await.unwrap();
    }

    #[test]
    fn flush_records_each_timeout() {
        let bus = InMemoryEventBus::new();
        bus.flush(Duration::from_secs(5)).unwrap();
        bus.flush(Duration::ZERO).unwrap();

        assert_eq!(bus.flush_count(), 2);
        assert_eq!(bus.flush_timeouts(), vec![Duration::from_secs(5), Duration::ZERO]);
    }

    #[tokio::test]
    async fn empty_subscription_is_rejected() {
        let bus = InMemoryEventBus::new();
        assert!(bus.subscribe(&[]).await.is_err());
    }
}
