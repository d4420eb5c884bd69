//! Emergency controls.
//!
//! Provides the two halting mechanisms of the control plane:
//! - Kill switch with condition monitoring and auto-recovery
//! - Controlled, rate-limited liquidation of positions

mod kill_switch;
mod liquidation;

pub use kill_switch::*;
pub use liquidation::*;
