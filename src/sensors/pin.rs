//! Digital input lines.
//!
//! [`DigitalInput`] is the only view sensors have of the hardware. The
//! [`SimulatedPin`] drives it from software and raises an interrupt on every
//! level change, like an edge-triggered GPIO configured for `CHANGE`.

use super::notifier::InterruptNotifier;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// A readable digital input line.
pub trait DigitalInput: Send + Sync {
    /// Pin identifier, used to route interrupts.
    fn pin(&self) -> u8;

    /// Current raw level (`true` = high).
    fn read(&self) -> bool;
}

/// Software-driven input line.
///
/// The read count lets tests assert how often a sensor sampled the line.
pub struct SimulatedPin {
    pin: u8,
    level: AtomicBool,
    reads: AtomicU32,
    notifier: RwLock<Option<InterruptNotifier>>,
}

impl SimulatedPin {
    pub fn new(pin: u8, initial: bool) -> Self {
        Self {
            pin,
            level: AtomicBool::new(initial),
            reads: AtomicU32::new(0),
            notifier: RwLock::new(None),
        }
    }

    /// Wire the pin to an interrupt line.
    pub fn set_notifier(&self, notifier: InterruptNotifier) {
        *self.notifier.write() = Some(notifier);
    }

    /// Drive the line. Raises an interrupt if the level changed.
    pub fn set(&self, level: bool) {
        let old = self.level.swap(level, Ordering::SeqCst);
        if old != level {
            if let Some(notifier) = self.notifier.read().as_ref() {
                notifier.notify();
            }
        }
    }

    /// Flip the line and return the new level. Always raises an interrupt.
    pub fn toggle(&self) -> bool {
        let old = self.level.fetch_xor(true, Ordering::SeqCst);
        if let Some(notifier) = self.notifier.read().as_ref() {
            notifier.notify();
        }
        !old
    }

    /// Level without counting it as a sensor read.
    pub fn level(&self) -> bool {
        self.level.load(Ordering::SeqCst)
    }

    /// Number of [`DigitalInput::read`] calls so far.
    pub fn read_count(&self) -> u32 {
        self.reads.load(Ordering::SeqCst)
    }
}

impl DigitalInput for SimulatedPin {
    fn pin(&self) -> u8 {
        self.pin
    }

    fn read(&self) -> bool {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.level.load(Ordering::SeqCst)
    }
}

impl<P: DigitalInput + ?Sized> DigitalInput for std::sync::Arc<P> {
    fn pin(&self) -> u8 {
        (**self).pin()
    }

    fn read(&self) -> bool {
        (**self).read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::notifier::InterruptSignal;
    use embassy_sync::signal::Signal;

    static SIGNAL: InterruptSignal = Signal::new();

    #[test]
    fn test_read_counts_samples() {
        let pin = SimulatedPin::new(3, true);
        assert_eq!(pin.read_count(), 0);
        assert!(pin.read());
        assert!(pin.level());
        assert_eq!(pin.read_count(), 1);
    }

    #[test]
    fn test_set_raises_interrupt_only_on_change() {
        let pin = SimulatedPin::new(5, false);
        pin.set_notifier(InterruptNotifier::new(&SIGNAL, 5));

        pin.set(false);
        assert_eq!(SIGNAL.try_take(), None);

        pin.set(true);
        assert_eq!(SIGNAL.try_take(), Some(5));

        assert!(!pin.toggle());
        assert_eq!(SIGNAL.try_take(), Some(5));
    }
}
