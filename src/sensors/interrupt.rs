//! Interrupt-driven digital input capability.
//!
//! Wraps a [`DigitalInput`] with the settings every interrupt-based sensor
//! shares: reporting polarity, which edges count, an arm switch and a
//! quiet window after an accepted interrupt. Sensors compose this instead of
//! re-implementing the edge handling.
//!
//! Settings use atomics so they can be tuned while the sensor is already
//! shared with the node loop.

use super::child::Child;
use super::pin::DigitalInput;
use embassy_time::{Duration, Instant};
use log::debug;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use strum::FromRepr;

/// Which raw level transitions are reported.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, FromRepr, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum InterruptMode {
    /// Every level change
    #[default]
    Change = 0,
    /// Only transitions to high
    Rising = 1,
    /// Only transitions to low
    Falling = 2,
}

impl InterruptMode {
    /// Whether a raw level read right after the interrupt matches this mode.
    pub fn accepts(self, raw: bool) -> bool {
        match self {
            InterruptMode::Change => true,
            InterruptMode::Rising => raw,
            InterruptMode::Falling => !raw,
        }
    }
}

pub struct InterruptInput<P: DigitalInput> {
    input: P,
    invert_value_to_report: AtomicBool,
    mode: AtomicU8,
    armed: AtomicBool,
    /// Quiet window in milliseconds.
    wait_after_interrupt: AtomicU64,
    last_accepted: Mutex<Option<Instant>>,
}

impl<P: DigitalInput> InterruptInput<P> {
    pub fn new(input: P) -> Self {
        Self {
            input,
            invert_value_to_report: AtomicBool::new(false),
            mode: AtomicU8::new(InterruptMode::Change as u8),
            armed: AtomicBool::new(true),
            wait_after_interrupt: AtomicU64::new(0),
            last_accepted: Mutex::new(None),
        }
    }

    pub fn pin(&self) -> u8 {
        self.input.pin()
    }

    pub fn input(&self) -> &P {
        &self.input
    }

    pub fn set_invert_value_to_report(&self, invert: bool) {
        self.invert_value_to_report.store(invert, Ordering::SeqCst);
    }

    pub fn invert_value_to_report(&self) -> bool {
        self.invert_value_to_report.load(Ordering::SeqCst)
    }

    pub fn set_mode(&self, mode: InterruptMode) {
        self.mode.store(mode as u8, Ordering::SeqCst);
    }

    pub fn mode(&self) -> InterruptMode {
        InterruptMode::from_repr(self.mode.load(Ordering::SeqCst)).unwrap_or_default()
    }

    /// A disarmed input ignores interrupts; scheduled reads still work.
    pub fn set_armed(&self, armed: bool) {
        self.armed.store(armed, Ordering::SeqCst);
    }

    pub fn armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    /// Ignore interrupts arriving within `duration` of the last accepted one.
    pub fn set_wait_after_interrupt(&self, duration: Duration) {
        self.wait_after_interrupt
            .store(duration.as_millis(), Ordering::SeqCst);
    }

    pub fn wait_after_interrupt(&self) -> Duration {
        Duration::from_millis(self.wait_after_interrupt.load(Ordering::SeqCst))
    }

    /// Raw level, without polarity inversion.
    pub fn read_raw(&self) -> bool {
        self.input.read()
    }

    /// Level as it should be reported, with polarity inversion applied.
    pub fn read_value(&self) -> bool {
        let raw = self.input.read();
        if self.invert_value_to_report() { !raw } else { raw }
    }

    /// Handle an interrupt on the line.
    ///
    /// Samples the line and stores the reportable value into `child`. Returns
    /// `false` when the interrupt is ignored (disarmed, inside the quiet
    /// window, or an edge the mode filters out); no value is stored then.
    pub fn on_interrupt(&self, child: &Child) -> bool {
        if !self.armed() {
            debug!("[Interrupt] pin {} disarmed, ignoring", self.pin());
            return false;
        }

        let now = Instant::now();
        let window = self.wait_after_interrupt();
        {
            let last = self.last_accepted.lock();
            if let Some(last) = *last
                && window.as_ticks() > 0
                && now.duration_since(last) < window
            {
                debug!("[Interrupt] pin {} inside quiet window, ignoring", self.pin());
                return false;
            }
        }

        let raw = self.input.read();
        if !self.mode().accepts(raw) {
            debug!(
                "[Interrupt] pin {} edge to {} filtered by {:?}",
                self.pin(),
                raw,
                self.mode()
            );
            return false;
        }

        *self.last_accepted.lock() = Some(now);
        let value = if self.invert_value_to_report() { !raw } else { raw };
        child.set_value(value as i32);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Presentation, ValueType};
    use crate::sensors::pin::SimulatedPin;
    use std::sync::Arc;

    fn setup(level: bool) -> (Arc<SimulatedPin>, InterruptInput<Arc<SimulatedPin>>, Child) {
        let pin = Arc::new(SimulatedPin::new(3, level));
        let input = InterruptInput::new(pin.clone());
        let child = Child::new(0, Presentation::Door, ValueType::Tripped, "DOOR").unwrap();
        (pin, input, child)
    }

    #[test]
    fn test_change_mode_stores_value() {
        let (_pin, input, child) = setup(true);
        assert!(input.on_interrupt(&child));
        assert_eq!(child.take_pending(), Some(1));
    }

    #[test]
    fn test_inversion_applies_to_reported_value() {
        let (_pin, input, child) = setup(true);
        input.set_invert_value_to_report(true);
        assert!(input.on_interrupt(&child));
        assert_eq!(child.take_pending(), Some(0));
        assert!(!input.read_value());
        assert!(input.read_raw());
    }

    #[test]
    fn test_disarmed_ignores_interrupt() {
        let (pin, input, child) = setup(true);
        input.set_armed(false);
        assert!(!input.on_interrupt(&child));
        assert!(!child.is_pending());
        assert_eq!(pin.read_count(), 0);
    }

    #[test]
    fn test_mode_filters_edges() {
        let (pin, input, child) = setup(false);
        input.set_mode(InterruptMode::Rising);
        assert!(!input.on_interrupt(&child));

        pin.set(true);
        assert!(input.on_interrupt(&child));

        input.set_mode(InterruptMode::Falling);
        assert_eq!(input.mode(), InterruptMode::Falling);
        assert!(!input.on_interrupt(&child));
    }

    #[test]
    fn test_quiet_window_ignores_bounce() {
        let (_pin, input, child) = setup(true);
        input.set_wait_after_interrupt(Duration::from_secs(60));
        assert!(input.on_interrupt(&child));
        assert!(!input.on_interrupt(&child));
    }
}
