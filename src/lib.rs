//! Door sensor node with sure-delivery override.
//!
//! This library provides the door/contact sensor driver, the coordinator
//! that performs retried sends, and the node runtime wiring them together.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod input;
pub mod node;
pub mod protocol;
pub mod sensors;
