//! Door simulation for testing.
//!
//! Opens and closes the simulated door periodically so the interrupt and
//! sure-delivery path can be watched without hardware.

use crate::sensors::SimulatedPin;
use log::info;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, interval};

/// Spawn a task that toggles the door pin every `period`.
///
/// # Returns
///
/// A `JoinHandle` that can be used to abort the simulation task.
pub fn run_door_simulation(pin: Arc<SimulatedPin>, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = interval(period);
        // The first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            let level = pin.toggle();
            info!(
                "[Sim] door {}",
                if level { "opened (pin high)" } else { "closed (pin low)" }
            );
        }
    })
}
