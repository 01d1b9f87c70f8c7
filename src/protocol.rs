//! Message types exchanged between a sensor node and its gateway.
//!
//! Numeric values follow the MySensors serial protocol so messages can be
//! logged and compared against gateway traces. Encoding to the wire is left to
//! the transport.

use serde::{Deserialize, Serialize};
use strum::FromRepr;

/// Child id reserved for the node itself.
pub const NODE_SENSOR_ID: u8 = 255;

/// Node id of the gateway.
pub const GATEWAY_ADDRESS: u8 = 0;

/// Message command kind.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, FromRepr, Serialize, Deserialize)]
#[repr(u8)]
pub enum Command {
    Presentation = 0,
    Set = 1,
    Req = 2,
    Internal = 3,
    Stream = 4,
}

/// Value type tag carried by `Set` and `Req` messages.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, FromRepr, Serialize, Deserialize)]
#[repr(u8)]
pub enum ValueType {
    Temp = 0,
    Hum = 1,
    /// Binary on/off status
    Status = 2,
    Percentage = 3,
    Armed = 15,
    /// Door/window open-closed state
    Tripped = 16,
    Custom = 48,
}

/// Device type announced when a child is presented.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, FromRepr, Serialize, Deserialize)]
#[repr(u8)]
pub enum Presentation {
    Door = 0,
    Motion = 1,
    Smoke = 2,
    BinarySwitch = 3,
    Custom = 23,
}

/// A single protocol message.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub sender: u8,
    pub destination: u8,
    /// Child id the message is about.
    pub sensor: u8,
    pub command: Command,
    /// Value type for `Set`/`Req`; presentation messages leave this as `Custom`.
    pub value_type: ValueType,
    /// Presentation type, only meaningful for `Presentation` messages.
    #[serde(default)]
    pub presentation: Option<Presentation>,
    /// Ask the receiver to echo the message back.
    pub echo_requested: bool,
    /// Set when this message is the echo of an earlier outbound message.
    pub echo: bool,
    pub payload: i32,
    #[serde(default)]
    pub description: Option<String>,
}

impl Message {
    fn new(sensor: u8, command: Command, value_type: ValueType) -> Self {
        Self {
            sender: NODE_SENSOR_ID,
            destination: GATEWAY_ADDRESS,
            sensor,
            command,
            value_type,
            presentation: None,
            echo_requested: false,
            echo: false,
            payload: 0,
            description: None,
        }
    }

    /// A `Set` message reporting `value` for a child.
    pub fn set(sensor: u8, value_type: ValueType, value: i32) -> Self {
        let mut message = Self::new(sensor, Command::Set, value_type);
        message.payload = value;
        message
    }

    /// A `Req` message asking for the current value of a child.
    pub fn request(sensor: u8, value_type: ValueType) -> Self {
        Self::new(sensor, Command::Req, value_type)
    }

    /// A presentation message announcing a child and its description.
    pub fn presentation(sensor: u8, presentation: Presentation, description: &str) -> Self {
        let mut message = Self::new(sensor, Command::Presentation, ValueType::Custom);
        message.presentation = Some(presentation);
        message.description = Some(description.to_string());
        message
    }

    /// The echo a receiver sends back for `original`.
    pub fn echo_of(original: &Message) -> Self {
        let mut message = original.clone();
        message.sender = original.destination;
        message.destination = original.sender;
        message.echo_requested = false;
        message.echo = true;
        message
    }

    /// Address the message from and to specific nodes.
    pub fn with_route(mut self, sender: u8, destination: u8) -> Self {
        self.sender = sender;
        self.destination = destination;
        self
    }

    pub fn is_echo(&self) -> bool {
        self.echo
    }

    /// Whether this message is the echo of `original` (same child, command and type).
    pub fn echoes(&self, original: &Message) -> bool {
        self.echo
            && self.sensor == original.sensor
            && self.command == original.command
            && self.value_type == original.value_type
    }
}
