//! Child devices reported by a sensor.
//!
//! A child is the addressable unit of a node: it is presented once with its
//! device type and description, and then carries the value the node reports
//! for it. Setting a value marks it pending until the node sent it.

use crate::error::{NodeError, Result};
use crate::protocol::{Message, NODE_SENSOR_ID, Presentation, ValueType};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};

pub struct Child {
    id: u8,
    presentation: Presentation,
    value_type: ValueType,
    description: String,
    value: AtomicI32,
    pending: AtomicBool,
    version: AtomicU32,
}

impl Child {
    /// Create a child. Fails for the id reserved for the node itself.
    pub fn new(
        id: u8,
        presentation: Presentation,
        value_type: ValueType,
        description: impl Into<String>,
    ) -> Result<Self> {
        if id == NODE_SENSOR_ID {
            return Err(NodeError::InvalidChildId(id));
        }
        Ok(Self {
            id,
            presentation,
            value_type,
            description: description.into(),
            value: AtomicI32::new(0),
            pending: AtomicBool::new(false),
            version: AtomicU32::new(0),
        })
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn presentation(&self) -> Presentation {
        self.presentation
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Last stored value.
    pub fn value(&self) -> i32 {
        self.value.load(Ordering::SeqCst)
    }

    /// Store a value to report. Increments version if the value changed.
    pub fn set_value(&self, value: i32) {
        let old = self.value.swap(value, Ordering::SeqCst);
        if old != value {
            self.version.fetch_add(1, Ordering::SeqCst);
        }
        self.pending.store(true, Ordering::SeqCst);
    }

    /// Whether a value is waiting to be sent.
    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::SeqCst)
    }

    /// Consume the pending value, if any.
    pub fn take_pending(&self) -> Option<i32> {
        if self.pending.swap(false, Ordering::SeqCst) {
            Some(self.value())
        } else {
            None
        }
    }

    /// Number of value changes so far.
    pub fn version(&self) -> u32 {
        self.version.load(Ordering::SeqCst)
    }

    /// `Set` message carrying `value` for this child.
    pub fn value_message(&self, value: i32) -> Message {
        Message::set(self.id, self.value_type, value)
    }

    pub fn presentation_message(&self) -> Message {
        Message::presentation(self.id, self.presentation, &self.description)
    }
}
