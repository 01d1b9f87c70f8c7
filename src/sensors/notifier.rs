//! Interrupt line notifier.
//!
//! Hardware (or the simulation) raises an interrupt by signalling the pin id.
//! The node loop waits on the same signal and dispatches the interrupt to the
//! sensors attached to that pin.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;

/// Signal shared between interrupt sources and the node loop.
pub type InterruptSignal = Signal<CriticalSectionRawMutex, u8>;

/// Raises interrupts for one digital input line.
///
/// # Usage
/// ```ignore
/// static INTERRUPTS: InterruptSignal = Signal::new();
///
/// let notifier = InterruptNotifier::new(&INTERRUPTS, 3);
/// notifier.notify();
/// ```
pub struct InterruptNotifier {
    signal: &'static InterruptSignal,
    pin: u8,
}

impl InterruptNotifier {
    pub fn new(signal: &'static InterruptSignal, pin: u8) -> Self {
        Self { signal, pin }
    }

    /// Pin this notifier raises interrupts for.
    pub fn pin(&self) -> u8 {
        self.pin
    }

    /// Raise the interrupt. Non-blocking; a second interrupt before the node
    /// loop consumed the first one replaces it.
    pub fn notify(&self) {
        self.signal.signal(self.pin);
    }
}
