//! Transport-wide send reliability configuration.
//!
//! The coordinator owns the acknowledgement flag, retry count and inter-retry
//! pause used for every outbound message of the node. Sensors never own this
//! state; they push temporary values through the [`Coordinator`] trait and
//! restore the defaults once their send concluded.

mod transport_coordinator;

pub use transport_coordinator::{SendOutcome, Transport, TransportCoordinator};

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One consistent set of send reliability parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Request an echo from the receiver for every attempt.
    pub ack: bool,
    /// Total number of attempts (0 behaves like 1).
    pub retries: u8,
    /// Pause after each attempt while waiting for the echo.
    #[serde(with = "duration_ms")]
    pub inter_retry_sleep: Duration,
    /// Power the radio down during the pause instead of busy-waiting.
    pub sleep_on_retry: bool,
}

impl RetryPolicy {
    /// Out-of-box coordinator configuration: one best-effort attempt.
    pub const fn coordinator_defaults() -> Self {
        Self {
            ack: false,
            retries: 1,
            inter_retry_sleep: Duration::ZERO,
            sleep_on_retry: false,
        }
    }

    /// Parameters used while a state change must be delivered.
    pub const fn sure_delivery() -> Self {
        Self {
            ack: true,
            retries: 10,
            inter_retry_sleep: Duration::from_millis(5000),
            sleep_on_retry: true,
        }
    }

    /// Number of transmit attempts this policy allows.
    pub fn attempts(&self) -> u8 {
        self.retries.max(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::coordinator_defaults()
    }
}

/// Configuration surface of the component that performs retried sends.
///
/// All calls are fire-and-forget and must be cheap enough to run from
/// interrupt dispatch.
pub trait Coordinator: Send + Sync {
    fn set_ack_required(&self, ack: bool);

    fn set_retry_count(&self, retries: u8);

    fn set_inter_retry_sleep(&self, duration: Duration);

    fn set_sleep_on_retry(&self, sleep: bool);

    /// Stop the in-flight retry loop of the current outbound message.
    fn abandon_remaining_retries(&self);

    /// Push a whole policy.
    ///
    /// Implementations holding the policy behind a single lock should override
    /// this so a concurrent send never observes a partially applied group.
    fn apply_policy(&self, policy: &RetryPolicy) {
        self.set_ack_required(policy.ack);
        self.set_retry_count(policy.retries);
        self.set_inter_retry_sleep(policy.inter_retry_sleep);
        self.set_sleep_on_retry(policy.sleep_on_retry);
    }
}

/// Serialize durations as integer milliseconds.
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Test doubles for the coordinator and the transport.

    use super::{Coordinator, RetryPolicy, Transport};
    use crate::error::{NodeError, Result};
    use crate::protocol::Message;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Transport that records sends and echoes or fails on demand.
    #[derive(Default)]
    pub struct ScriptedTransport {
        pub sent: Mutex<Vec<Message>>,
        pub inbound: Mutex<VecDeque<Message>>,
        /// Queue an echo after this attempt number (1-based, counted over all sends).
        pub echo_on_attempt: Option<usize>,
        pub fail_all: bool,
        /// Fail this many transmits before succeeding.
        pub failures_left: Mutex<usize>,
        pub pauses: Mutex<Vec<(Duration, bool)>>,
    }

    impl ScriptedTransport {
        pub fn echoing_on(attempt: usize) -> Self {
            Self {
                echo_on_attempt: Some(attempt),
                ..Default::default()
            }
        }

        pub fn push_inbound(&self, message: Message) {
            self.inbound.lock().push_back(message);
        }

        pub fn sent(&self) -> Vec<Message> {
            self.sent.lock().clone()
        }
    }

    impl Transport for ScriptedTransport {
        fn transmit(&self, message: &Message) -> Result<()> {
            if self.fail_all {
                return Err(NodeError::Transport("radio busy".to_string()));
            }
            {
                let mut left = self.failures_left.lock();
                if *left > 0 {
                    *left -= 1;
                    return Err(NodeError::Transport("radio busy".to_string()));
                }
            }
            let mut sent = self.sent.lock();
            sent.push(message.clone());
            if self.echo_on_attempt == Some(sent.len()) {
                self.inbound.lock().push_back(Message::echo_of(message));
            }
            Ok(())
        }

        fn poll_inbound(&self) -> Option<Message> {
            self.inbound.lock().pop_front()
        }

        fn pause(&self, duration: Duration, sleep: bool) {
            self.pauses.lock().push((duration, sleep));
        }
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub enum Call {
        Ack(bool),
        Retries(u8),
        Sleep(Duration),
        SleepOnRetry(bool),
        Abandon,
    }

    pub struct RecordingCoordinator {
        current: Mutex<RetryPolicy>,
        calls: Mutex<Vec<Call>>,
    }

    impl RecordingCoordinator {
        pub fn new() -> Self {
            Self {
                current: Mutex::new(RetryPolicy::coordinator_defaults()),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn current(&self) -> RetryPolicy {
            *self.current.lock()
        }

        pub fn calls(&self) -> Vec<Call> {
            self.calls.lock().clone()
        }

        pub fn abandon_count(&self) -> usize {
            self.calls
                .lock()
                .iter()
                .filter(|call| **call == Call::Abandon)
                .count()
        }
    }

    impl Coordinator for RecordingCoordinator {
        fn set_ack_required(&self, ack: bool) {
            self.current.lock().ack = ack;
            self.calls.lock().push(Call::Ack(ack));
        }

        fn set_retry_count(&self, retries: u8) {
            self.current.lock().retries = retries;
            self.calls.lock().push(Call::Retries(retries));
        }

        fn set_inter_retry_sleep(&self, duration: Duration) {
            self.current.lock().inter_retry_sleep = duration;
            self.calls.lock().push(Call::Sleep(duration));
        }

        fn set_sleep_on_retry(&self, sleep: bool) {
            self.current.lock().sleep_on_retry = sleep;
            self.calls.lock().push(Call::SleepOnRetry(sleep));
        }

        fn abandon_remaining_retries(&self) {
            self.calls.lock().push(Call::Abandon);
        }
    }
}
