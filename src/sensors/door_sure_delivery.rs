//! Door sensor with temporary sure-delivery override.
//!
//! Regular reports go out with whatever reliability the coordinator is
//! configured for, usually a single best-effort attempt. A door state change
//! must not get lost, so an interrupt pushes a stricter retry policy into the
//! coordinator for the report it triggers, and the post-send hook restores
//! the defaults whatever the outcome was.
//!
//! Lifecycle of one override:
//! 1. `on_interrupt` marks the interrupt pending, applies the override policy
//!    and lets the interrupt input sample the line into the child.
//! 2. `on_loop` sees the pending flag, skips its own read and clears the flag.
//!    If the interrupt was declined it re-reports the cached value.
//! 3. The coordinator sends with retries. An echo of the tripped value reaching
//!    `on_receive` abandons the remaining retries.
//! 4. `after_send` applies the restore policy. Restoring twice is harmless.

use super::Sensor;
use super::child::Child;
use super::interrupt::InterruptInput;
use super::pin::DigitalInput;
use crate::coordinator::{Coordinator, RetryPolicy};
use crate::error::Result;
use crate::protocol::{Command, Message, Presentation, ValueType};
use log::{debug, info};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Description presented for the configurable sensor.
pub const DOOR_SURE_DELIVERY_NAME: &str = "DOOR_PERIODIC_SURE_DELI";

/// Description presented for the sensor without override.
pub const DOOR_PERIODIC_NAME: &str = "DOOR_PERIODIC";

/// Override and restore parameter sets.
///
/// `restore_policy` must mirror what the coordinator is configured with
/// outside of an override, otherwise the node drifts to different defaults
/// after the first door event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SureDeliveryPolicy {
    /// When false the sensor never touches the coordinator configuration.
    pub enabled: bool,
    pub override_policy: RetryPolicy,
    pub restore_policy: RetryPolicy,
    /// Request the override for scheduled reports too, not only interrupts.
    pub on_scheduled_report: bool,
}

impl SureDeliveryPolicy {
    /// Policy of the sensor variant without override.
    pub const fn disabled() -> Self {
        Self {
            enabled: false,
            override_policy: RetryPolicy::coordinator_defaults(),
            restore_policy: RetryPolicy::coordinator_defaults(),
            on_scheduled_report: false,
        }
    }
}

impl Default for SureDeliveryPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            override_policy: RetryPolicy::sure_delivery(),
            restore_policy: RetryPolicy::coordinator_defaults(),
            on_scheduled_report: false,
        }
    }
}

/// Door/contact sensor reporting its tripped state.
pub struct DoorSureDeliverySensor<C: Coordinator + ?Sized, P: DigitalInput> {
    name: &'static str,
    input: InterruptInput<P>,
    child: Child,
    coordinator: Arc<C>,
    /// Set by `on_interrupt`, cleared at the end of the next `on_loop`.
    interrupt_pending: AtomicBool,
    delivery: RwLock<SureDeliveryPolicy>,
}

impl<C: Coordinator + ?Sized, P: DigitalInput> DoorSureDeliverySensor<C, P> {
    /// Sensor with the configurable override, using the default parameters.
    pub fn new(input: P, child_id: u8, coordinator: Arc<C>) -> Result<Self> {
        Self::with_policy(
            DOOR_SURE_DELIVERY_NAME,
            input,
            child_id,
            coordinator,
            SureDeliveryPolicy::default(),
        )
    }

    /// Sensor that reports like the full variant but never overrides the
    /// coordinator configuration.
    pub fn simplified(input: P, child_id: u8, coordinator: Arc<C>) -> Result<Self> {
        Self::with_policy(
            DOOR_PERIODIC_NAME,
            input,
            child_id,
            coordinator,
            SureDeliveryPolicy::disabled(),
        )
    }

    fn with_policy(
        name: &'static str,
        input: P,
        child_id: u8,
        coordinator: Arc<C>,
        delivery: SureDeliveryPolicy,
    ) -> Result<Self> {
        let child = Child::new(child_id, Presentation::Door, ValueType::Tripped, name)?;
        Ok(Self {
            name,
            input: InterruptInput::new(input),
            child,
            coordinator,
            interrupt_pending: AtomicBool::new(false),
            delivery: RwLock::new(delivery),
        })
    }

    /// The interrupt capability, for polarity, mode and arming settings.
    pub fn input(&self) -> &InterruptInput<P> {
        &self.input
    }

    pub fn set_invert_value_to_report(&self, invert: bool) {
        self.input.set_invert_value_to_report(invert);
    }

    pub fn interrupt_pending(&self) -> bool {
        self.interrupt_pending.load(Ordering::SeqCst)
    }

    /// Current override and restore parameters.
    pub fn delivery(&self) -> SureDeliveryPolicy {
        *self.delivery.read()
    }

    /// Replace all parameters at once. Takes effect on the next override.
    pub fn set_delivery(&self, delivery: SureDeliveryPolicy) {
        *self.delivery.write() = delivery;
    }

    pub fn set_retries(&self, retries: u8) {
        self.delivery.write().override_policy.retries = retries;
    }

    pub fn set_sleep_between_retries(&self, duration: Duration) {
        self.delivery.write().override_policy.inter_retry_sleep = duration;
    }

    pub fn set_sleep_between_retries_sleep_or_wait(&self, sleep: bool) {
        self.delivery.write().override_policy.sleep_on_retry = sleep;
    }

    pub fn set_default_retries(&self, retries: u8) {
        self.delivery.write().restore_policy.retries = retries;
    }

    pub fn set_default_sleep_between_retries(&self, duration: Duration) {
        self.delivery.write().restore_policy.inter_retry_sleep = duration;
    }

    pub fn set_default_sleep_between_retries_sleep_or_wait(&self, sleep: bool) {
        self.delivery.write().restore_policy.sleep_on_retry = sleep;
    }

    pub fn set_default_ack(&self, ack: bool) {
        self.delivery.write().restore_policy.ack = ack;
    }

    pub fn set_sure_delivery_on_loop(&self, enabled: bool) {
        self.delivery.write().on_scheduled_report = enabled;
    }

    fn start_sure_delivery(&self) {
        let delivery = self.delivery();
        if !delivery.enabled {
            return;
        }
        self.coordinator.apply_policy(&delivery.override_policy);
        debug!(
            "[Door] child {} override applied: {:?}",
            self.child.id(),
            delivery.override_policy
        );
    }

    fn stop_sure_delivery(&self) {
        let delivery = self.delivery();
        if !delivery.enabled {
            return;
        }
        self.coordinator.apply_policy(&delivery.restore_policy);
        debug!("[Door] child {} defaults restored", self.child.id());
    }

    /// Echo of this child's own tripped report.
    fn is_own_tripped_echo(&self, message: &Message) -> bool {
        message.is_echo()
            && message.sensor == self.child.id()
            && message.command == Command::Set
            && message.value_type == ValueType::Tripped
    }
}

impl<C: Coordinator + ?Sized, P: DigitalInput> Sensor for DoorSureDeliverySensor<C, P> {
    fn name(&self) -> &str {
        self.name
    }

    fn pin(&self) -> u8 {
        self.input.pin()
    }

    fn children(&self) -> &[Child] {
        std::slice::from_ref(&self.child)
    }

    fn on_interrupt(&self) -> bool {
        self.interrupt_pending.store(true, Ordering::SeqCst);
        self.start_sure_delivery();

        let report = self.input.on_interrupt(&self.child);
        if !report {
            // No send follows, so nothing would run the post-send hook.
            self.stop_sure_delivery();
        } else {
            info!(
                "[Door] child {} changed to {} (version {})",
                self.child.id(),
                self.child.value(),
                self.child.version()
            );
        }
        report
    }

    fn on_loop(&self, child: &Child) {
        if !self.interrupt_pending.load(Ordering::SeqCst) {
            if self.delivery().on_scheduled_report {
                self.start_sure_delivery();
            }
            let value = self.input.read_value();
            child.set_value(value as i32);
        } else if !child.is_pending() {
            // The interrupt was declined, so report the cached value instead.
            child.set_value(child.value());
        }
        self.interrupt_pending.store(false, Ordering::SeqCst);
    }

    fn on_receive(&self, message: &Message) {
        let Some(child) = self.child(message.sensor) else {
            return;
        };

        if message.command == Command::Req
            && (message.value_type == ValueType::Status
                || message.value_type == child.value_type())
        {
            child.set_value(self.input.read_raw() as i32);
        } else if self.is_own_tripped_echo(message) {
            debug!(
                "[Door] child {} echo received, skipping remaining retries",
                child.id()
            );
            self.coordinator.abandon_remaining_retries();
        }
    }

    fn after_send(&self, _child: &Child) {
        self.stop_sure_delivery();
    }
}
