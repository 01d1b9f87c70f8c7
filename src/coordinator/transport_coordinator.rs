//! Retried sends on top of a best-effort transport.

use super::{Coordinator, RetryPolicy};
use crate::error::{NodeError, Result};
use crate::protocol::Message;
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Best-effort message channel between the node and its gateway.
pub trait Transport: Send + Sync {
    /// Hand one message to the radio.
    fn transmit(&self, message: &Message) -> Result<()>;

    /// Next inbound message, if one is queued.
    fn poll_inbound(&self) -> Option<Message>;

    /// Pause between retries. `sleep` selects powering down over busy-waiting.
    fn pause(&self, duration: Duration, sleep: bool) {
        let _ = sleep;
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// Result of one retried send.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SendOutcome {
    /// Attempts started, including ones whose transmit failed.
    pub attempts: u8,
    /// Attempts the transport accepted.
    pub transmitted: u8,
    /// A matching echo arrived during the send.
    pub echoed: bool,
    /// The loop was stopped through `abandon_remaining_retries`.
    pub abandoned: bool,
}

/// Coordinator performing the retry loop with the currently configured policy.
pub struct TransportCoordinator<T: Transport> {
    transport: T,
    policy: Mutex<RetryPolicy>,
    abandon: AtomicBool,
}

impl<T: Transport> TransportCoordinator<T> {
    /// Create a coordinator with the out-of-box defaults.
    pub fn new(transport: T) -> Self {
        Self::with_policy(transport, RetryPolicy::coordinator_defaults())
    }

    pub fn with_policy(transport: T, policy: RetryPolicy) -> Self {
        Self {
            transport,
            policy: Mutex::new(policy),
            abandon: AtomicBool::new(false),
        }
    }

    /// Snapshot of the current configuration.
    pub fn policy(&self) -> RetryPolicy {
        *self.policy.lock()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send once, ignoring the retry configuration.
    pub fn send_best_effort(&self, message: &Message) -> Result<()> {
        let mut outbound = message.clone();
        outbound.echo_requested = false;
        self.transport.transmit(&outbound)
    }

    /// Send `message` using the policy in effect when the call starts.
    ///
    /// Inbound messages arriving while waiting for an echo are handed to
    /// `on_inbound`, which may call [`Coordinator::abandon_remaining_retries`].
    /// Fails only when no attempt reached the transport.
    pub fn send(
        &self,
        message: &Message,
        on_inbound: &mut dyn FnMut(&Message),
    ) -> Result<SendOutcome> {
        let policy = self.policy();
        self.abandon.store(false, Ordering::SeqCst);

        let mut outbound = message.clone();
        outbound.echo_requested = policy.ack;

        let mut outcome = SendOutcome::default();
        let mut last_error = None;

        for attempt in 1..=policy.attempts() {
            if self.abandon.load(Ordering::SeqCst) {
                outcome.abandoned = true;
                break;
            }

            outcome.attempts = attempt;
            match self.transport.transmit(&outbound) {
                Ok(()) => {
                    outcome.transmitted += 1;
                    debug!(
                        "[Coordinator] child {} attempt {}/{} sent",
                        message.sensor,
                        attempt,
                        policy.attempts()
                    );
                }
                Err(e) => {
                    warn!(
                        "[Coordinator] child {} attempt {}/{} failed: {}",
                        message.sensor,
                        attempt,
                        policy.attempts(),
                        e
                    );
                    last_error = Some(e);
                }
            }

            if !policy.ack {
                if outcome.transmitted > 0 {
                    break;
                }
                continue;
            }

            self.transport
                .pause(policy.inter_retry_sleep, policy.sleep_on_retry);
            while let Some(inbound) = self.transport.poll_inbound() {
                if inbound.echoes(&outbound) {
                    outcome.echoed = true;
                }
                on_inbound(&inbound);
            }
        }

        // An abandon request during the final pause still counts.
        if self.abandon.swap(false, Ordering::SeqCst) {
            outcome.abandoned = true;
        }

        if outcome.transmitted == 0 {
            return Err(last_error.unwrap_or_else(|| {
                NodeError::Transport(format!("no attempt sent for child {}", message.sensor))
            }));
        }

        if outcome.abandoned {
            info!(
                "[Coordinator] child {} delivered after {} attempt(s), remaining retries abandoned",
                message.sensor, outcome.attempts
            );
        }

        Ok(outcome)
    }
}

impl<T: Transport> Coordinator for TransportCoordinator<T> {
    fn set_ack_required(&self, ack: bool) {
        self.policy.lock().ack = ack;
    }

    fn set_retry_count(&self, retries: u8) {
        self.policy.lock().retries = retries;
    }

    fn set_inter_retry_sleep(&self, duration: Duration) {
        self.policy.lock().inter_retry_sleep = duration;
    }

    fn set_sleep_on_retry(&self, sleep: bool) {
        self.policy.lock().sleep_on_retry = sleep;
    }

    fn abandon_remaining_retries(&self) {
        self.abandon.store(true, Ordering::SeqCst);
    }

    fn apply_policy(&self, policy: &RetryPolicy) {
        *self.policy.lock() = *policy;
    }
}
