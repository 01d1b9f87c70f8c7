//! Lossy loopback radio link.
//!
//! Stands in for the radio and the gateway at once: every transmitted message
//! is dropped with the configured probability, and messages that get through
//! with an echo requested are echoed back into the inbound queue.

use crate::coordinator::Transport;
use crate::error::Result;
use crate::protocol::Message;
use log::{debug, trace};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Counters of what happened on the simulated link.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub transmitted: u32,
    pub lost: u32,
    pub echoed: u32,
}

pub struct LossyLoopback {
    loss: f64,
    echo: f64,
    rng: Mutex<StdRng>,
    inbound: Mutex<VecDeque<Message>>,
    transmitted: AtomicU32,
    lost: AtomicU32,
    echoed: AtomicU32,
}

impl LossyLoopback {
    /// `loss` and `echo` are probabilities in `0.0..=1.0`.
    pub fn new(loss: f64, echo: f64) -> Self {
        Self::with_rng(loss, echo, StdRng::from_entropy())
    }

    /// Deterministic link for reproducible runs.
    pub fn seeded(loss: f64, echo: f64, seed: u64) -> Self {
        Self::with_rng(loss, echo, StdRng::seed_from_u64(seed))
    }

    fn with_rng(loss: f64, echo: f64, rng: StdRng) -> Self {
        Self {
            loss: loss.clamp(0.0, 1.0),
            echo: echo.clamp(0.0, 1.0),
            rng: Mutex::new(rng),
            inbound: Mutex::new(VecDeque::new()),
            transmitted: AtomicU32::new(0),
            lost: AtomicU32::new(0),
            echoed: AtomicU32::new(0),
        }
    }

    pub fn stats(&self) -> LinkStats {
        LinkStats {
            transmitted: self.transmitted.load(Ordering::SeqCst),
            lost: self.lost.load(Ordering::SeqCst),
            echoed: self.echoed.load(Ordering::SeqCst),
        }
    }
}

impl Transport for LossyLoopback {
    fn transmit(&self, message: &Message) -> Result<()> {
        self.transmitted.fetch_add(1, Ordering::SeqCst);

        let (lost, echo) = {
            let mut rng = self.rng.lock();
            (rng.gen_bool(self.loss), rng.gen_bool(self.echo))
        };

        if lost {
            self.lost.fetch_add(1, Ordering::SeqCst);
            debug!(
                "[Sim] link dropped child {} {:?} {}",
                message.sensor, message.command, message.payload
            );
            return Ok(());
        }

        trace!("[Sim] link delivered {:?}", message);
        if message.echo_requested && echo {
            self.echoed.fetch_add(1, Ordering::SeqCst);
            self.inbound.lock().push_back(Message::echo_of(message));
        }
        Ok(())
    }

    fn poll_inbound(&self) -> Option<Message> {
        self.inbound.lock().pop_front()
    }

    fn pause(&self, duration: Duration, sleep: bool) {
        if duration.is_zero() {
            return;
        }
        debug!(
            "[Sim] {} {} ms between retries",
            if sleep { "sleeping" } else { "waiting" },
            duration.as_millis()
        );
        std::thread::sleep(duration);
    }
}
