//! Node runtime driving the registered sensors.
//!
//! The node owns the coordinator and calls the sensor event handlers in the
//! order they rely on:
//!
//! - an interrupt runs `on_interrupt`, then `on_loop` and a send for every
//!   child of the sensors on that pin;
//! - a report cycle runs `on_loop` and a send for every child;
//! - every send is followed by `after_send`, even when it failed;
//! - inbound messages reach `on_receive` of the sensor owning the addressed
//!   child, including while a send waits for its echo.

use crate::coordinator::{SendOutcome, Transport, TransportCoordinator};
use crate::error::{NodeError, Result};
use crate::protocol::{Command, GATEWAY_ADDRESS, Message};
use crate::sensors::{Child, InterruptSignal, Sensor};
use embassy_futures::select::{Either, select};
use embassy_time::{Duration, Instant, Timer};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

pub struct Node<T: Transport> {
    node_id: u8,
    coordinator: Arc<TransportCoordinator<T>>,
    sensors: Vec<Box<dyn Sensor>>,
    /// Requests received during a send, answered once it completed.
    deferred_replies: Mutex<VecDeque<(usize, u8)>>,
}

impl<T: Transport> Node<T> {
    pub fn new(node_id: u8, coordinator: Arc<TransportCoordinator<T>>) -> Self {
        Self {
            node_id,
            coordinator,
            sensors: Vec::new(),
            deferred_replies: Mutex::new(VecDeque::new()),
        }
    }

    pub fn coordinator(&self) -> &Arc<TransportCoordinator<T>> {
        &self.coordinator
    }

    pub fn sensors(&self) -> &[Box<dyn Sensor>] {
        &self.sensors
    }

    /// Add a sensor. Child ids must be unique across the node.
    pub fn register(&mut self, sensor: Box<dyn Sensor>) -> Result<()> {
        for child in sensor.children() {
            let taken = self
                .sensors
                .iter()
                .any(|existing| existing.child(child.id()).is_some());
            if taken {
                return Err(NodeError::DuplicateChild(child.id()));
            }
        }
        info!(
            "[Node] registered {} on pin {} ({} child(ren))",
            sensor.name(),
            sensor.pin(),
            sensor.children().len()
        );
        self.sensors.push(sensor);
        Ok(())
    }

    /// Presentation messages for every child.
    pub fn presentation(&self) -> Vec<Message> {
        self.sensors
            .iter()
            .flat_map(|sensor| sensor.children())
            .map(|child| {
                child
                    .presentation_message()
                    .with_route(self.node_id, GATEWAY_ADDRESS)
            })
            .collect()
    }

    /// Announce all children to the gateway, best effort.
    pub fn present(&self) -> Result<()> {
        for message in self.presentation() {
            self.coordinator.send_best_effort(&message)?;
            debug!("[Node] presented child {}", message.sensor);
        }
        Ok(())
    }

    /// Dispatch an interrupt raised on `pin`.
    ///
    /// A failed send does not stop the remaining children; the first error is
    /// returned once every child and deferred reply had its turn.
    pub fn handle_interrupt(&self, pin: u8) -> Result<()> {
        let mut failure = None;
        for (index, sensor) in self.sensors.iter().enumerate() {
            if sensor.pin() != pin {
                continue;
            }
            if !sensor.on_interrupt() {
                debug!("[Node] {} ignored interrupt on pin {}", sensor.name(), pin);
                continue;
            }
            for child in sensor.children() {
                sensor.on_loop(child);
                if let Err(e) = self.send_pending(index, child) {
                    failure.get_or_insert(e);
                }
            }
        }
        self.finish(failure)
    }

    /// One scheduled report cycle over all sensors, with the same error
    /// handling as `handle_interrupt`.
    pub fn run_report_cycle(&self) -> Result<()> {
        let mut failure = None;
        for (index, sensor) in self.sensors.iter().enumerate() {
            for child in sensor.children() {
                sensor.on_loop(child);
                if let Err(e) = self.send_pending(index, child) {
                    failure.get_or_insert(e);
                }
            }
        }
        self.finish(failure)
    }

    /// Handle one inbound message.
    pub fn handle_inbound(&self, message: &Message) -> Result<()> {
        if message.destination != self.node_id {
            debug!(
                "[Node] ignoring message for node {}",
                message.destination
            );
            return Ok(());
        }
        self.route_inbound(message);
        self.flush_deferred_replies()
    }

    /// Drain messages the transport received outside of a send.
    pub fn poll_transport(&self) -> Result<usize> {
        let mut handled = 0;
        while let Some(message) = self.coordinator.transport().poll_inbound() {
            self.handle_inbound(&message)?;
            handled += 1;
        }
        Ok(handled)
    }

    /// Run the node loop: scheduled reports every `report_interval`, with
    /// interrupts dispatched as soon as they are signalled.
    ///
    /// The node sleeps between events like a battery node: the transport is
    /// only polled after a wake-up, so a request arriving while idle is
    /// answered after the next report or interrupt.
    ///
    /// Send failures are logged and the loop keeps going. Returns after
    /// `max_cycles` report cycles, or never when `None`.
    pub async fn run(
        &self,
        interrupts: &InterruptSignal,
        report_interval: Duration,
        max_cycles: Option<u64>,
    ) {
        let mut next_report = Instant::now() + report_interval;
        let mut cycles = 0u64;

        loop {
            match select(Timer::at(next_report), interrupts.wait()).await {
                Either::First(()) => {
                    next_report += report_interval;
                    if let Err(e) = self.run_report_cycle() {
                        warn!("[Node] report cycle failed: {}", e);
                    }
                    cycles += 1;
                }
                Either::Second(pin) => {
                    if let Err(e) = self.handle_interrupt(pin) {
                        warn!("[Node] interrupt on pin {} failed: {}", pin, e);
                    }
                }
            }

            if let Err(e) = self.poll_transport() {
                warn!("[Node] inbound handling failed: {}", e);
            }

            if max_cycles.is_some_and(|max| cycles >= max) {
                info!("[Node] stopping after {} report cycle(s)", cycles);
                return;
            }
        }
    }

    fn route_inbound(&self, message: &Message) {
        for (index, sensor) in self.sensors.iter().enumerate() {
            let Some(child) = sensor.child(message.sensor) else {
                continue;
            };
            sensor.on_receive(message);
            if message.command == Command::Req && !message.is_echo() {
                self.deferred_replies.lock().push_back((index, child.id()));
            }
        }
    }

    /// Flush deferred replies, then report the first failure, if any.
    fn finish(&self, failure: Option<NodeError>) -> Result<()> {
        let flushed = self.flush_deferred_replies();
        match failure {
            Some(e) => Err(e),
            None => flushed,
        }
    }

    fn flush_deferred_replies(&self) -> Result<()> {
        let mut failure = None;
        loop {
            let next = self.deferred_replies.lock().pop_front();
            let Some((index, child_id)) = next else {
                break;
            };
            let sensor = &self.sensors[index];
            if let Some(child) = sensor.child(child_id)
                && let Err(e) = self.send_pending(index, child)
            {
                failure.get_or_insert(e);
            }
        }
        failure.map_or(Ok(()), Err)
    }

    /// Send the child's pending value, then run the post-send hook.
    fn send_pending(&self, index: usize, child: &Child) -> Result<Option<SendOutcome>> {
        let Some(value) = child.take_pending() else {
            return Ok(None);
        };
        let sensor = &self.sensors[index];
        let message = child
            .value_message(value)
            .with_route(self.node_id, GATEWAY_ADDRESS);

        let result = self
            .coordinator
            .send(&message, &mut |inbound| self.route_inbound(inbound));
        sensor.after_send(child);

        match &result {
            Ok(outcome) => debug!(
                "[Node] child {} value {} sent: {:?}",
                child.id(),
                value,
                outcome
            ),
            Err(e) => warn!("[Node] child {} value {} not sent: {}", child.id(), value, e),
        }
        result.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::testing::ScriptedTransport;
    use crate::coordinator::{Coordinator, RetryPolicy};
    use crate::protocol::ValueType;
    use crate::sensors::{DoorSureDeliverySensor, SimulatedPin};
    use embassy_sync::signal::Signal;
    use std::time::Duration;

    const NODE_ID: u8 = 7;

    fn node_with_door(
        transport: ScriptedTransport,
        level: bool,
    ) -> (Arc<SimulatedPin>, Node<ScriptedTransport>) {
        let coordinator = Arc::new(TransportCoordinator::new(transport));
        let pin = Arc::new(SimulatedPin::new(3, level));
        let door = DoorSureDeliverySensor::new(pin.clone(), 1, coordinator.clone()).unwrap();
        door.set_retries(3);
        door.set_sleep_between_retries(Duration::from_millis(3000));
        door.set_sleep_between_retries_sleep_or_wait(true);

        let mut node = Node::new(NODE_ID, coordinator);
        node.register(Box::new(door)).unwrap();
        (pin, node)
    }

    #[test]
    fn test_register_rejects_duplicate_child() {
        let (_pin, mut node) = node_with_door(ScriptedTransport::default(), false);
        let pin = Arc::new(SimulatedPin::new(4, false));
        let other =
            DoorSureDeliverySensor::new(pin, 1, node.coordinator().clone()).unwrap();
        let result = node.register(Box::new(other));
        assert!(matches!(result, Err(NodeError::DuplicateChild(1))));
        assert_eq!(node.sensors().len(), 1);
    }

    #[test]
    fn test_presentation_messages() {
        let (_pin, node) = node_with_door(ScriptedTransport::default(), false);
        node.present().unwrap();

        let sent = node.coordinator().transport().sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].command, Command::Presentation);
        assert_eq!(sent[0].sender, NODE_ID);
        assert!(!sent[0].echo_requested);
    }

    #[test]
    fn test_interrupt_report_uses_override_then_restores() {
        let (_pin, node) = node_with_door(ScriptedTransport::default(), true);
        node.handle_interrupt(3).unwrap();

        let transport = node.coordinator().transport();
        let sent = transport.sent();
        assert_eq!(sent.len(), 3);
        assert!(sent.iter().all(|m| m.echo_requested && m.payload == 1));
        assert_eq!(
            transport.pauses.lock()[0],
            (Duration::from_millis(3000), true)
        );
        assert_eq!(
            node.coordinator().policy(),
            RetryPolicy::coordinator_defaults()
        );
    }

    #[test]
    fn test_echo_confirms_delivery_early() {
        let (_pin, node) = node_with_door(ScriptedTransport::echoing_on(1), true);
        node.handle_interrupt(3).unwrap();

        let sent = node.coordinator().transport().sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].sensor, 1);
        assert_eq!(sent[0].value_type, ValueType::Tripped);
        assert_eq!(
            node.coordinator().policy(),
            RetryPolicy::coordinator_defaults()
        );
    }

    #[test]
    fn test_failed_send_still_restores() {
        let transport = ScriptedTransport {
            fail_all: true,
            ..Default::default()
        };
        let (_pin, node) = node_with_door(transport, true);
        assert!(node.handle_interrupt(3).is_err());
        assert_eq!(
            node.coordinator().policy(),
            RetryPolicy::coordinator_defaults()
        );
    }

    #[test]
    fn test_ignored_interrupt_keeps_next_report() {
        let coordinator = Arc::new(TransportCoordinator::new(ScriptedTransport::default()));
        let pin = Arc::new(SimulatedPin::new(3, true));
        let door = DoorSureDeliverySensor::new(pin.clone(), 1, coordinator.clone()).unwrap();
        door.input().set_armed(false);
        let mut node = Node::new(NODE_ID, coordinator);
        node.register(Box::new(door)).unwrap();

        node.run_report_cycle().unwrap();
        node.handle_interrupt(3).unwrap();
        let reads = pin.read_count();
        node.run_report_cycle().unwrap();

        let sent = node.coordinator().transport().sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].payload, 1);
        assert!(!sent[1].echo_requested);
        assert_eq!(pin.read_count(), reads);
        assert_eq!(
            node.coordinator().policy(),
            RetryPolicy::coordinator_defaults()
        );
    }

    #[test]
    fn test_failed_child_does_not_block_others() {
        let transport = ScriptedTransport {
            failures_left: Mutex::new(3),
            ..Default::default()
        };
        let (_pin, mut node) = node_with_door(transport, true);
        let second = DoorSureDeliverySensor::new(
            Arc::new(SimulatedPin::new(3, true)),
            2,
            node.coordinator().clone(),
        )
        .unwrap();
        second.set_retries(1);
        node.register(Box::new(second)).unwrap();
        node.coordinator().transport().push_inbound(
            Message::request(1, ValueType::Status).with_route(GATEWAY_ADDRESS, NODE_ID),
        );

        assert!(matches!(
            node.handle_interrupt(3),
            Err(NodeError::Transport(_))
        ));

        let sent = node.coordinator().transport().sent();
        // Child 1 failed all three attempts; child 2 and the deferred reply still went out.
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].sensor, 2);
        assert!(sent[0].echo_requested);
        assert_eq!(sent[1].sensor, 1);
        assert!(!sent[1].echo_requested);
        assert_eq!(
            node.coordinator().policy(),
            RetryPolicy::coordinator_defaults()
        );
    }

    #[test]
    fn test_scheduled_report_is_best_effort() {
        let (pin, node) = node_with_door(ScriptedTransport::default(), true);
        node.run_report_cycle().unwrap();

        let sent = node.coordinator().transport().sent();
        assert_eq!(sent.len(), 1);
        assert!(!sent[0].echo_requested);
        assert_eq!(pin.read_count(), 1);
    }

    #[test]
    fn test_interrupt_on_other_pin_ignored() {
        let (pin, node) = node_with_door(ScriptedTransport::default(), true);
        node.handle_interrupt(9).unwrap();
        assert!(node.coordinator().transport().sent().is_empty());
        assert_eq!(pin.read_count(), 0);
    }

    #[test]
    fn test_status_request_answered_with_fresh_read() {
        let (pin, node) = node_with_door(ScriptedTransport::default(), false);
        pin.set(true);

        let request = Message::request(1, ValueType::Status).with_route(GATEWAY_ADDRESS, NODE_ID);
        node.handle_inbound(&request).unwrap();

        let sent = node.coordinator().transport().sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].payload, 1);
        assert_eq!(pin.read_count(), 1);
    }

    #[test]
    fn test_request_during_send_answered_after_it() {
        let (_pin, node) = node_with_door(ScriptedTransport::default(), true);
        let transport = node.coordinator().transport();
        transport.push_inbound(
            Message::request(1, ValueType::Status).with_route(GATEWAY_ADDRESS, NODE_ID),
        );

        node.handle_interrupt(3).unwrap();

        let sent = transport.sent();
        // Three override attempts, then the best-effort reply.
        assert_eq!(sent.len(), 4);
        assert!(!sent[3].echo_requested);
    }

    #[test]
    fn test_message_for_other_node_ignored() {
        let (pin, node) = node_with_door(ScriptedTransport::default(), true);
        let request = Message::request(1, ValueType::Status).with_route(GATEWAY_ADDRESS, 42);
        node.handle_inbound(&request).unwrap();
        assert_eq!(pin.read_count(), 0);
    }

    #[test]
    fn test_door_open_scenario() {
        // Override 3 x 3000 ms with sleep and ack, defaults 1 x 0 ms busy-wait.
        let (_pin, node) = node_with_door(ScriptedTransport::echoing_on(1), true);
        let coordinator = node.coordinator();
        assert_eq!(coordinator.policy(), RetryPolicy::coordinator_defaults());

        node.handle_interrupt(3).unwrap();

        let sent = coordinator.transport().sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].payload, 1);
        assert!(sent[0].echo_requested);

        // A late duplicate echo and a second restore change nothing.
        coordinator.abandon_remaining_retries();
        assert_eq!(coordinator.policy(), RetryPolicy::coordinator_defaults());
    }

    #[test]
    fn test_run_answers_idle_request_after_wake() {
        static INTERRUPTS: InterruptSignal = Signal::new();

        let (_pin, node) = node_with_door(ScriptedTransport::default(), true);
        node.coordinator().transport().push_inbound(
            Message::request(1, ValueType::Status).with_route(GATEWAY_ADDRESS, NODE_ID),
        );

        tokio_test::block_on(node.run(
            &INTERRUPTS,
            embassy_time::Duration::from_millis(20),
            Some(1),
        ));

        let sent = node.coordinator().transport().sent();
        // Scheduled report, then the request is picked up on the same wake-up.
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|m| m.sensor == 1 && !m.echo_requested));
    }

    #[test]
    fn test_run_dispatches_interrupt_and_reports() {
        static INTERRUPTS: InterruptSignal = Signal::new();

        let (_pin, node) = node_with_door(ScriptedTransport::echoing_on(1), true);
        INTERRUPTS.signal(3);

        tokio_test::block_on(node.run(
            &INTERRUPTS,
            embassy_time::Duration::from_millis(20),
            Some(1),
        ));

        let sent = node.coordinator().transport().sent();
        // Interrupt report delivered on the first attempt, then one scheduled report.
        assert_eq!(sent.len(), 2);
        assert!(sent[0].echo_requested);
        assert!(!sent[1].echo_requested);
        assert_eq!(
            node.coordinator().policy(),
            RetryPolicy::coordinator_defaults()
        );
    }
}
