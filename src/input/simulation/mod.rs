//! Simulated hardware for development and testing.

pub mod sensors;
pub mod transport;

pub use sensors::run_door_simulation;
pub use transport::LossyLoopback;
