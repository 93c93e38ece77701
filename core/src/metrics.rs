//! Metric names and the Prometheus exporter.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `rides.admitted` - rides created by the simulator
//! - `rides.events.generated` - events emitted by the simulator
//! - `rides.faulted` - rides removed after a transition error
//! - `ride_events.published` - events acknowledged by the broker
//! - `ride_events.publish_failed` - events the broker rejected
//! - `ride_events.persisted` - rows written by the consumer
//! - `ride_events.duplicates` - deliveries ignored as already stored
//! - `ride_events.rejected` - messages the consumer could not decode or store
//!
//! ## Gauges
//! - `rides.active` - size of the simulator working set
//!
//! ## Histograms
//! - `ride_events.insert.duration_seconds` - time spent in one sink insert

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::{Ipv4Addr, SocketAddr};
use thiserror::Error;

/// Rides admitted by the simulator.
pub const RIDES_ADMITTED: &str = "rides.admitted";
/// Events generated by the simulator.
pub const RIDES_EVENTS_GENERATED: &str = "rides.events.generated";
/// Rides dropped after a transition error.
pub const RIDES_FAULTED: &str = "rides.faulted";
/// Current working-set size.
pub const RIDES_ACTIVE: &str = "rides.active";
/// Events acknowledged by the broker.
pub const EVENTS_PUBLISHED: &str = "ride_events.published";
/// Events the broker rejected.
pub const EVENTS_PUBLISH_FAILED: &str = "ride_events.publish_failed";
/// Rows written by the consumer.
pub const EVENTS_PERSISTED: &str = "ride_events.persisted";
/// Deliveries ignored because the row already existed.
pub const EVENTS_DUPLICATES: &str = "ride_events.duplicates";
/// Messages dropped by the consumer.
pub const EVENTS_REJECTED: &str = "ride_events.rejected";
/// Latency of one insert into the database.
pub const INSERT_DURATION_SECONDS: &str = "ride_events.insert.duration_seconds";

/// Errors from metrics setup.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to install the Prometheus exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Register descriptions for every metric above.
pub fn describe_metrics() {
    describe_counter!(RIDES_ADMITTED, "Rides created by the simulator");
    describe_counter!(RIDES_EVENTS_GENERATED, "Ride events emitted by the simulator");
    describe_counter!(RIDES_FAULTED, "Rides removed after an invalid transition");
    describe_gauge!(RIDES_ACTIVE, "Rides currently in the simulator working set");
    describe_counter!(EVENTS_PUBLISHED, "Ride events acknowledged by the broker");
    describe_counter!(EVENTS_PUBLISH_FAILED, "Ride events the broker failed to accept");
    describe_counter!(EVENTS_PERSISTED, "Ride events written to the database");
    describe_counter!(EVENTS_DUPLICATES, "Ride event deliveries ignored as duplicates");
    describe_counter!(EVENTS_REJECTED, "Messages the consumer could not decode or store");
    describe_histogram!(INSERT_DURATION_SECONDS, "Time spent inserting one ride event");
}

/// Serve `/metrics` on `0.0.0.0:port` and register metric descriptions.
///
/// # Errors
///
/// Returns [`MetricsError::Install`] if a recorder is already installed or the
/// listener cannot be started.
pub fn install_prometheus(port: u16) -> Result<SocketAddr, MetricsError> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| MetricsError::Install(e.to_string()))?;

    describe_metrics();
    tracing::info!(%addr, "Prometheus metrics available at http://{addr}/metrics");
    Ok(addr)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_names_are_distinct() {
        let names = [
            RIDES_ADMITTED,
            RIDES_EVENTS_GENERATED,
            RIDES_FAULTED,
            RIDES_ACTIVE,
            EVENTS_PUBLISHED,
            EVENTS_PUBLISH_FAILED,
            EVENTS_PERSISTED,
            EVENTS_DUPLICATES,
            EVENTS_REJECTED,
            INSERT_DURATION_SECONDS,
        ];
        let unique: std::collections::HashSet<_> = names.iter().collect();
        assert_eq!(unique.len(), names.len());
    }

    #[test]
    fn describing_without_a_recorder_is_a_noop() {
        describe_metrics();
    }
}
