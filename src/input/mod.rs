//! Input sources feeding the node without real hardware.
//!
//! Current input sources:
//! - `simulation`: software-driven door and a lossy radio link

pub mod simulation;
