//! Sensors attached to the node.
//!
//! Every sensor implements the [`Sensor`] event contract the node runtime
//! drives: interrupts, the scheduled report cycle, inbound messages and the
//! post-send hook. Shared capabilities like interrupt handling live in their
//! own types and are composed into concrete sensors.

pub mod child;
pub mod door_sure_delivery;
pub mod interrupt;
pub mod notifier;
pub mod pin;

pub use child::Child;
pub use door_sure_delivery::{DoorSureDeliverySensor, SureDeliveryPolicy};
pub use interrupt::{InterruptInput, InterruptMode};
pub use notifier::{InterruptNotifier, InterruptSignal};
pub use pin::{DigitalInput, SimulatedPin};

use crate::protocol::Message;

/// Event handlers invoked by the node runtime.
///
/// Handlers take `&self`: the interrupt path and the report cycle may run in
/// different contexts, so sensors keep their mutable state in atomics.
pub trait Sensor: Send + Sync {
    /// Description presented for the sensor.
    fn name(&self) -> &str;

    /// Interrupt line this sensor listens on.
    fn pin(&self) -> u8;

    fn children(&self) -> &[Child];

    /// Child addressed by a message's sensor index.
    fn child(&self, id: u8) -> Option<&Child> {
        self.children().iter().find(|child| child.id() == id)
    }

    /// An interrupt fired on [`Sensor::pin`]. Returns whether a report
    /// should be produced for it right away.
    fn on_interrupt(&self) -> bool;

    /// Scheduled report for `child`: store the value to send, if any.
    fn on_loop(&self, child: &Child);

    /// Inbound message for this node.
    fn on_receive(&self, message: &Message);

    /// A send for `child` concluded, successfully or not.
    fn after_send(&self, child: &Child);
}
