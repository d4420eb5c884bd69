//! Stop-loss protection.
//!
//! This module provides:
//! - `StopLossEngine`: order book of protective stops, trailing and expiry
//! - `AutoExecutor`: the periodic evaluation driver with execution stats

mod auto_executor;
mod engine;

pub use auto_executor::*;
pub use engine::*;

use crate::gateway::GatewayError;
use crate::scheduler::AlreadyRunning;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sentinel_domain::DomainError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Stop-loss engine errors.
#[derive(Debug, thiserror::Error)]
pub enum StopLossError {
    /// Malformed parameters.
    #[error("invalid stop-loss: {0}")]
    Validation(String),
    /// Parameters outside configured risk bounds.
    #[error("risk limit exceeded: {0}")]
    RiskLimit(String),
    /// The position already has an active order.
    #[error("position {0} already has an active stop-loss")]
    Duplicate(String),
    #[error("stop-loss order not found: {0}")]
    NotFound(String),
    /// Illegal state transition.
    #[error(transparent)]
    Domain(#[from] DomainError),
    /// The order executor failed; the order was returned to active.
    #[error("execution of {order_id} failed: {source}")]
    Execution {
        order_id: String,
        #[source]
        source: GatewayError,
    },
    #[error("evaluation timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    AlreadyRunning(#[from] AlreadyRunning),
}

/// Outcome of one stop-loss execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub order_id: String,
    pub position_id: String,
    pub symbol: String,
    pub trigger_price: Decimal,
    pub execution_price: Option<Decimal>,
    pub realized_pnl: Option<Decimal>,
    pub slippage_pct: Option<Decimal>,
    pub success: bool,
    pub error: Option<String>,
    pub executed_at: DateTime<Utc>,
}
