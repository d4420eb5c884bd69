//! Controlled liquidation requests and their outcomes.

use crate::enums::{LiquidationReason, LiquidationStatus, Side};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A request to unwind all or part of a position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidationRequest {
    pub position_id: Option<String>,
    pub symbol: Option<String>,
    pub exchange: Option<String>,
    /// Share of the position on the 0..=100 scale; zero means 100.
    pub percentage: Decimal,
    pub reason: LiquidationReason,
    pub triggered_by: String,
    /// Fraction, e.g. 0.02 for 2%.
    pub max_slippage: Option<Decimal>,
    pub require_confirmation: bool,
    pub time_limit: Option<Duration>,
}

impl LiquidationRequest {
    /// Full unwind of one position.
    pub fn for_position(
        position_id: impl Into<String>,
        reason: LiquidationReason,
        triggered_by: impl Into<String>,
    ) -> Self {
        Self {
            position_id: Some(position_id.into()),
            symbol: None,
            exchange: None,
            percentage: Decimal::ZERO,
            reason,
            triggered_by: triggered_by.into(),
            max_slippage: None,
            require_confirmation: false,
            time_limit: None,
        }
    }

    #[must_use]
    pub fn with_percentage(mut self, percentage: Decimal) -> Self {
        self.percentage = percentage;
        self
    }

    /// Human-readable target for logs.
    pub fn target(&self) -> String {
        match (&self.position_id, &self.symbol) {
            (Some(id), _) => id.clone(),
            (None, Some(symbol)) => symbol.clone(),
            (None, None) => "<none>".to_string(),
        }
    }
}

/// Full execution record for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidationResult {
    pub id: String,
    pub position_id: Option<String>,
    pub symbol: Option<String>,
    pub exchange: Option<String>,
    pub side: Option<Side>,
    pub reason: LiquidationReason,
    pub triggered_by: String,
    pub percentage: Decimal,
    pub original_size: Decimal,
    pub liquidated_size: Decimal,
    pub remaining_size: Decimal,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub slippage_pct: Decimal,
    pub gross_pnl: Decimal,
    pub fees: Decimal,
    pub net_pnl: Decimal,
    pub status: LiquidationStatus,
    pub error: Option<String>,
    pub warnings: Vec<String>,
    pub requested_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl LiquidationResult {
    pub fn pending(id: impl Into<String>, request: &LiquidationRequest, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            position_id: request.position_id.clone(),
            symbol: request.symbol.clone(),
            exchange: request.exchange.clone(),
            side: None,
            reason: request.reason,
            triggered_by: request.triggered_by.clone(),
            percentage: request.percentage,
            original_size: Decimal::ZERO,
            liquidated_size: Decimal::ZERO,
            remaining_size: Decimal::ZERO,
            entry_price: Decimal::ZERO,
            exit_price: Decimal::ZERO,
            slippage_pct: Decimal::ZERO,
            gross_pnl: Decimal::ZERO,
            fees: Decimal::ZERO,
            net_pnl: Decimal::ZERO,
            status: LiquidationStatus::Pending,
            error: None,
            warnings: Vec::new(),
            requested_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Closes the record with `status` and an explanation.
    pub fn finish_with_error(
        &mut self,
        status: LiquidationStatus,
        error: impl Into<String>,
        now: DateTime<Utc>,
    ) {
        self.status = status;
        self.error = Some(error.into());
        self.completed_at = Some(now);
    }
}

/// Per-UTC-day liquidation counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyLiquidationStats {
    pub date: NaiveDate,
    pub count: u32,
    /// Sum of realized losses, as a positive number.
    pub total_loss: Decimal,
}

impl DailyLiquidationStats {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            count: 0,
            total_loss: Decimal::ZERO,
        }
    }

    /// Resets the counters when `today` differs from the tracked date.
    pub fn roll_over(&mut self, today: NaiveDate) -> bool {
        if self.date == today {
            return false;
        }
        *self = Self::new(today);
        true
    }

    pub fn record_pnl(&mut self, net_pnl: Decimal) {
        if net_pnl < Decimal::ZERO {
            self.total_loss += -net_pnl;
        }
    }
}
