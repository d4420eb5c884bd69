//! Domain model for the trading-safety control plane.
//!
//! Pure data types and math shared by the storage and execution layers:
//! - Positions, fills and point-in-time snapshots
//! - Stop-loss orders and their state machine
//! - Directional PnL and slippage helpers
//! - Status enums for every component

pub mod entities;
pub mod enums;
pub mod error;
pub mod metrics;
pub mod value_objects;

pub use error::DomainError;
