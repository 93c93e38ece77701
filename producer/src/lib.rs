//! # Rideshare Producer
//!
//! Runs the ride simulator on a fixed tick and publishes every generated event
//! to the `ride-events` topic.
//!
//! ```text
//! run_generator ──emit──▶ RideEventPublisher ──channel──▶ delivery task ──▶ EventBus
//! ```
//!
//! The generator loop and the delivery task share nothing but the channel, so
//! a slow broker never delays a tick. On shutdown the queue drain and the
//! producer flush share a single `FLUSH_TIMEOUT_SECS` budget.

pub mod config;
pub mod generator;
pub mod publisher;

pub use config::{Config, ConfigError};
pub use generator::{GeneratorStats, run_generator};
pub use publisher::{
    DeliveryStats, EmitError, MAX_IN_FLIGHT, RideEventPublisher, drain_and_flush,
    spawn_delivery_task,
};
