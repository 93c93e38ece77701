//! Fixed-rate generator loop.

use crate::publisher::RideEventPublisher;
use rand::Rng;
use rideshare_core::simulation::RideSimulator;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// Totals for one generator run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GeneratorStats {
    /// Ticks executed
    pub ticks: u64,
    /// Events handed to the publisher
    pub emitted: u64,
    /// Events dropped before queuing
    pub skipped: u64,
    /// Rides removed after a transition error
    pub faults: u64,
}

/// Tick `simulator` every `period` until `shutdown` turns `true`.
///
/// The first tick runs immediately. A slow tick delays the following ones
/// instead of bunching them up. Shutdown is only observed between ticks, so a
/// tick in progress always completes and queues all its events.
pub async fn run_generator<R: Rng>(
    simulator: &mut RideSimulator<R>,
    publisher: &RideEventPublisher,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> GeneratorStats {
    let mut stats = GeneratorStats::default();
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(
        period_ms = u64::try_from(period.as_millis()).unwrap_or(u64::MAX),
        max_active_rides = simulator.config().max_active_rides,
        cancel_probability = simulator.config().cancel_probability,
        "Generator started"
    );

    while !*shutdown.borrow() {
        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                // A dropped sender also means stop
                if changed.is_err() {
                    break;
                }
            }

            _ = interval.tick() => {
                let outcome = simulator.tick();
                stats.ticks += 1;
                stats.faults += outcome.faults.len() as u64;

                for event in &outcome.events {
                    if publisher.emit(event).is_ok() {
                        stats.emitted += 1;
                    } else {
                        stats.skipped += 1;
                    }
                }

                tracing::debug!(
                    tick = stats.ticks,
                    events = outcome.events.len(),
                    faults = outcome.faults.len(),
                    retired = outcome.retired,
                    active = simulator.active_rides(),
                    "Tick complete"
                );
            }
        }
    }

    tracing::info!(
        ticks = stats.ticks,
        emitted = stats.emitted,
        skipped = stats.skipped,
        faults = stats.faults,
        "Generator stopped"
    );
    stats
}
