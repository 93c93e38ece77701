//! Ride event producer.
//!
//! Simulates rides and publishes their lifecycle events to Redpanda until
//! SIGINT or SIGTERM, then drains and flushes within `FLUSH_TIMEOUT_SECS`.

use anyhow::Context;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rideshare_core::environment::{SystemClock, UuidGenerator};
use rideshare_core::event_bus::EventBus;
use rideshare_core::fsm::TransitionTable;
use rideshare_core::logging::init_tracing;
use rideshare_core::metrics::install_prometheus;
use rideshare_core::shutdown::shutdown_channel;
use rideshare_core::simulation::RideSimulator;
use rideshare_producer::{
    Config, RideEventPublisher, drain_and_flush, run_generator, spawn_delivery_task,
};
use rideshare_redpanda::RedpandaEventBus;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let config = Config::from_env();
    init_tracing(&config.log);
    config.validate().context("Invalid producer configuration")?;

    info!(
        brokers = %config.brokers,
        topic = %config.topic,
        tick_interval_ms = u64::try_from(config.tick_interval.as_millis()).unwrap_or(u64::MAX),
        max_active_rides = config.simulation.max_active_rides,
        cancel_probability = config.simulation.cancel_probability,
        "Starting ride event producer"
    );

    if let Some(port) = config.metrics_port {
        install_prometheus(port).context("Failed to start metrics listener")?;
    }

    let event_bus: Arc<dyn EventBus> = Arc::new(
        RedpandaEventBus::builder()
            .brokers(&config.brokers)
            .producer_acks(&config.producer_acks)
            .build()
            .context("Failed to create Redpanda producer")?,
    );

    let (publisher, rx) = RideEventPublisher::channel();
    let delivery = spawn_delivery_task(Arc::clone(&event_bus), config.topic.clone(), rx);

    let shutdown = shutdown_channel();

    let mut simulator = RideSimulator::new(
        config.simulation.clone(),
        Arc::new(TransitionTable::standard()),
        StdRng::from_entropy(),
        Arc::new(SystemClock),
        Arc::new(UuidGenerator),
    );

    run_generator(&mut simulator, &publisher, config.tick_interval, shutdown).await;

    // Closing the channel lets the delivery task finish once it is empty
    drop(publisher);
    drain_and_flush(delivery, event_bus.as_ref(), config.flush_timeout).await;

    info!(in_flight_rides = simulator.active_rides(), "Producer stopped");
    Ok(())
}
