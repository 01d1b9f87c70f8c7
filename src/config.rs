use crate::coordinator::RetryPolicy;
use crate::error::{NodeError, Result};
use crate::protocol::NODE_SENSOR_ID;
use crate::sensors::{InterruptMode, SureDeliveryPolicy};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Load environment variables from .env file with robust parsing.
/// Handles values with spaces without requiring quotes.
pub fn load_dotenv() {
    let env_path = Path::new(".env");
    if !env_path.exists() {
        return;
    }

    let content = match fs::read_to_string(env_path) {
        Ok(c) => c,
        Err(_) => return,
    };

    for line in content.lines() {
        let line = line.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some((key, value)) = line.split_once('=') {
            let key = key.trim();
            let mut value = value.trim();

            if (value.starts_with('"') && value.ends_with('"'))
                || (value.starts_with('\'') && value.ends_with('\''))
            {
                value = &value[1..value.len() - 1];
            }

            // Variables already in the environment win
            if std::env::var(key).is_err() {
                // SAFETY: called at startup before any other thread exists
                unsafe { std::env::set_var(key, value) };
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub node: NodeConfig,
    pub door: DoorConfig,
    pub sure_delivery: SureDeliveryPolicy,
    pub simulation: SimulationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub node_id: u8,
    /// Seconds between scheduled report cycles.
    pub report_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DoorConfig {
    pub pin: u8,
    pub child_id: u8,
    pub invert_value_to_report: bool,
    pub mode: InterruptMode,
    pub wait_after_interrupt_ms: u64,
    /// Use the variant that never overrides the coordinator configuration.
    pub simplified: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Seconds between simulated door state changes.
    pub toggle_secs: u64,
    /// Probability that a transmitted message is lost.
    pub loss: f64,
    /// Probability that the gateway echoes a message it received with echo requested.
    pub echo: f64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: 1,
            report_interval_secs: 60,
        }
    }
}

impl Default for DoorConfig {
    fn default() -> Self {
        Self {
            pin: 3,
            child_id: 0,
            invert_value_to_report: false,
            mode: InterruptMode::Change,
            wait_after_interrupt_ms: 0,
            simplified: false,
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            toggle_secs: 20,
            loss: 0.3,
            echo: 1.0,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_flag(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
}

impl Config {
    /// Defaults overridden by environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Load a JSON configuration file, then apply environment overrides.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let mut config: Config = serde_json::from_str(&content)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Some(id) = env_parse("NODE_ID") {
            self.node.node_id = id;
        }
        if let Some(secs) = env_parse("REPORT_INTERVAL_SECS") {
            self.node.report_interval_secs = secs;
        }

        if let Some(pin) = env_parse("DOOR_PIN") {
            self.door.pin = pin;
        }
        if let Some(child_id) = env_parse("DOOR_CHILD_ID") {
            self.door.child_id = child_id;
        }
        if let Some(invert) = env_flag("DOOR_INVERT") {
            self.door.invert_value_to_report = invert;
        }
        if let Some(ms) = env_parse("DOOR_WAIT_AFTER_INTERRUPT_MS") {
            self.door.wait_after_interrupt_ms = ms;
        }
        if let Some(simplified) = env_flag("DOOR_SIMPLIFIED") {
            self.door.simplified = simplified;
        }

        let delivery = &mut self.sure_delivery;
        apply_policy_env(&mut delivery.override_policy, "SURE_DELIVERY");
        apply_policy_env(&mut delivery.restore_policy, "RESTORE");
        if let Some(on_loop) = env_flag("SURE_DELIVERY_ON_LOOP") {
            delivery.on_scheduled_report = on_loop;
        }

        if let Some(secs) = env_parse("SIM_TOGGLE_SECS") {
            self.simulation.toggle_secs = secs;
        }
        if let Some(loss) = env_parse("SIM_LOSS") {
            self.simulation.loss = loss;
        }
        if let Some(echo) = env_parse("SIM_ECHO") {
            self.simulation.echo = echo;
        }
    }

    /// Reject values the node cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.door.child_id == NODE_SENSOR_ID {
            return Err(NodeError::Config(format!(
                "door child id {} is reserved for the node",
                NODE_SENSOR_ID
            )));
        }
        if self.node.report_interval_secs == 0 {
            return Err(NodeError::Config(
                "report interval must be at least one second".to_string(),
            ));
        }
        for (name, p) in [("loss", self.simulation.loss), ("echo", self.simulation.echo)] {
            if !(0.0..=1.0).contains(&p) {
                return Err(NodeError::Config(format!(
                    "simulation {} probability {} outside 0..=1",
                    name, p
                )));
            }
        }
        Ok(())
    }
}

/// `<PREFIX>_RETRIES`, `<PREFIX>_SLEEP_MS`, `<PREFIX>_SLEEP_NOT_WAIT`, `<PREFIX>_ACK`.
fn apply_policy_env(policy: &mut RetryPolicy, prefix: &str) {
    if let Some(retries) = env_parse(&format!("{prefix}_RETRIES")) {
        policy.retries = retries;
    }
    if let Some(ms) = env_parse(&format!("{prefix}_SLEEP_MS")) {
        policy.inter_retry_sleep = Duration::from_millis(ms);
    }
    if let Some(sleep) = env_flag(&format!("{prefix}_SLEEP_NOT_WAIT")) {
        policy.sleep_on_retry = sleep;
    }
    if let Some(ack) = env_flag(&format!("{prefix}_ACK")) {
        policy.ack = ack;
    }
}
