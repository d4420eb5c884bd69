//! Position monitoring.
//!
//! Keeps the authoritative in-process view of open positions:
//! - Fill ingestion (idempotent per position id)
//! - Periodic price sync and unrealized PnL
//! - Terminal transitions (close, liquidate)
//! - Best-effort persistence and crash recovery

mod tracker;

pub use tracker::*;

use crate::gateway::GatewayError;
use crate::scheduler::AlreadyRunning;
use sentinel_domain::enums::PositionStatus;
use std::time::Duration;

/// Position tracker errors.
#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    /// Malformed input.
    #[error("invalid fill: {0}")]
    Validation(String),
    /// Unknown position id.
    #[error("position not found: {0}")]
    NotFound(String),
    /// Position already reached a terminal status.
    #[error("position {id} is not open (status: {status:?})")]
    NotOpen { id: String, status: PositionStatus },
    /// Price fetch failed.
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    /// Sync exceeded its time budget.
    #[error("sync timed out after {0:?}")]
    Timeout(Duration),
    /// Sync loop already started.
    #[error(transparent)]
    AlreadyRunning(#[from] AlreadyRunning),
}
