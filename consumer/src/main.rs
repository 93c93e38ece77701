//! Ride event consumer.
//!
//! Reads the `ride-events` topic and stores every event in `PostgreSQL` until
//! SIGINT or SIGTERM.

use anyhow::Context;
use rideshare_consumer::{Config, run_consumer};
use rideshare_core::logging::init_tracing;
use rideshare_core::metrics::install_prometheus;
use rideshare_core::shutdown::shutdown_channel;
use rideshare_postgres::PostgresRideEventStore;
use rideshare_redpanda::RedpandaEventBus;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let config = Config::from_env();
    init_tracing(&config.log);

    info!(
        brokers = %config.brokers,
        topic = %config.topic,
        consumer_group = %config.consumer_group,
        database = %config.database.display_target(),
        "Starting ride event consumer"
    );

    if let Some(port) = config.metrics_port {
        install_prometheus(port).context("Failed to start metrics listener")?;
    }

    let options = config
        .database
        .connect_options()
        .context("Invalid DATABASE_URL")?;
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .acquire_timeout(Duration::from_secs(30))
        .connect_with(options)
        .await
        .context("Failed to connect to PostgreSQL")?;
    let store = PostgresRideEventStore::from_pool(pool);
    store
        .run_migrations()
        .await
        .context("Failed to apply migrations")?;
    info!("Database ready");

    let event_bus = RedpandaEventBus::builder()
        .brokers(&config.brokers)
        .consumer_group(&config.consumer_group)
        .auto_offset_reset(&config.auto_offset_reset)
        .build()
        .context("Failed to create Redpanda consumer")?;

    let shutdown = shutdown_channel();

    let stats = run_consumer(&event_bus, &store, &config.topic, shutdown)
        .await
        .context("Failed to subscribe to ride events")?;

    store.pool().close().await;
    info!(
        persisted = stats.persisted,
        duplicates = stats.duplicates,
        "Consumer stopped"
    );
    Ok(())
}
