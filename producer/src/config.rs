//! Configuration management for the producer.
//!
//! Loads configuration from environment variables with sensible defaults.

use rideshare_core::event_bus::RIDE_EVENTS_TOPIC;
use rideshare_core::logging::LogConfig;
use rideshare_core::simulation::{
    DEFAULT_CANCEL_PROBABILITY, DEFAULT_MAX_ACTIVE_RIDES, SimulationConfig,
};
use std::env;
use std::time::Duration;
use thiserror::Error;

/// A setting that cannot be used.
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    /// Tick interval of zero
    #[error("TICK_INTERVAL_MS must be greater than 0")]
    ZeroTickInterval,

    /// Working set with no room
    #[error("MAX_ACTIVE_RIDES must be greater than 0")]
    ZeroCapacity,

    /// Probability outside `[0, 1]`
    #[error("CANCEL_PROBABILITY must be within [0, 1], got {0}")]
    CancelProbabilityOutOfRange(f64),
}

/// Producer configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Broker addresses (comma-separated)
    pub brokers: String,
    /// Topic ride events are published to
    pub topic: String,
    /// Producer acknowledgment mode
    pub producer_acks: String,
    /// Time between ticks
    pub tick_interval: Duration,
    /// Upper bound for draining and flushing on shutdown
    pub flush_timeout: Duration,
    /// Simulator tunables
    pub simulation: SimulationConfig,
    /// Logging settings
    pub log: LogConfig,
    /// Port for the Prometheus listener, if metrics are enabled
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            brokers: "redpanda:9092".to_string(),
            topic: RIDE_EVENTS_TOPIC.to_string(),
            producer_acks: "1".to_string(),
            tick_interval: Duration::from_millis(1000),
            flush_timeout: Duration::from_secs(5),
            simulation: SimulationConfig::default(),
            log: LogConfig::default(),
            metrics_port: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Unset or unparsable values fall back to their defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            brokers: env::var("KAFKA_BROKERS").unwrap_or_else(|_| "redpanda:9092".to_string()),
            topic: env::var("RIDE_EVENTS_TOPIC").unwrap_or_else(|_| RIDE_EVENTS_TOPIC.to_string()),
            producer_acks: env::var("PRODUCER_ACKS").unwrap_or_else(|_| "1".to_string()),
            tick_interval: Duration::from_millis(parse_var("TICK_INTERVAL_MS").unwrap_or(1000)),
            flush_timeout: Duration::from_secs(parse_var("FLUSH_TIMEOUT_SECS").unwrap_or(5)),
            simulation: SimulationConfig {
                max_active_rides: parse_var("MAX_ACTIVE_RIDES").unwrap_or(DEFAULT_MAX_ACTIVE_RIDES),
                cancel_probability: parse_var("CANCEL_PROBABILITY")
                    .unwrap_or(DEFAULT_CANCEL_PROBABILITY),
            },
            log: LogConfig::from_env(),
            metrics_port: parse_var("METRICS_PORT"),
        }
    }

    /// Reject settings the generator cannot run with.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval.is_zero() {
            return Err(ConfigError::ZeroTickInterval);
        }
        if self.simulation.max_active_rides == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        let p = self.simulation.cancel_probability;
        if !(0.0..=1.0).contains(&p) {
            return Err(ConfigError::CancelProbabilityOutOfRange(p));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|s| s.trim().parse().ok())
}
