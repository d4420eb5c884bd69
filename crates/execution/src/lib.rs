//! Trading-safety control plane.
//!
//! This crate provides the runtime components that guard live trading:
//! - Position tracking with exchange price reconciliation
//! - Stop-loss orders with trailing stops and automatic execution
//! - A kill switch driven by risk conditions
//! - Controlled, rate-limited liquidation
//! - Capability traits for prices, signals, orders and notifications

/// Prelude module for convenient imports.
pub mod prelude;

/// Risk-event notifications.
pub mod alerts;
/// Kill switch and controlled liquidation.
pub mod emergency;
/// Exchange-facing capabilities.
pub mod gateway;
/// Position tracking.
pub mod monitor;
/// Background loop lifecycle.
pub mod scheduler;
/// Stop-loss engine and auto-execution.
pub mod stop_loss;
