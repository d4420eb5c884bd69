//! Stop-loss orders and their state machine.

use crate::enums::{Side, StopLossStatus};
use crate::error::DomainError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Validated inputs for a new order.
#[derive(Debug, Clone)]
pub struct NewStopLoss {
    pub position_id: String,
    pub symbol: String,
    pub exchange: String,
    pub side: Side,
    pub entry_price: Decimal,
    pub position_size: Decimal,
    /// Fraction of entry, e.g. 0.02 for 2%.
    pub stop_loss_pct: Decimal,
    pub is_trailing: bool,
    /// Fraction of price kept between market and stop when trailing.
    pub trailing_distance: Decimal,
    pub expires_at: Option<DateTime<Utc>>,
}

/// A protective stop attached to one position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopLossOrder {
    pub id: String,
    pub position_id: String,
    pub symbol: String,
    pub exchange: String,
    pub side: Side,
    pub entry_price: Decimal,
    pub position_size: Decimal,
    pub stop_price: Decimal,
    pub stop_loss_pct: Decimal,
    pub is_trailing: bool,
    pub trailing_distance: Decimal,
    /// High-water mark (long trailing).
    pub highest_price: Decimal,
    /// Low-water mark (short trailing).
    pub lowest_price: Decimal,
    pub status: StopLossStatus,
    pub trigger_price: Option<Decimal>,
    pub execution_price: Option<Decimal>,
    pub execution_time: Option<DateTime<Utc>>,
    pub realized_pnl: Option<Decimal>,
    pub slippage_pct: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl StopLossOrder {
    pub fn new(params: NewStopLoss, now: DateTime<Utc>) -> Self {
        let stop_price =
            Self::compute_stop_price(params.side, params.entry_price, params.stop_loss_pct);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            position_id: params.position_id,
            symbol: params.symbol,
            exchange: params.exchange,
            side: params.side,
            entry_price: params.entry_price,
            position_size: params.position_size,
            stop_price,
            stop_loss_pct: params.stop_loss_pct,
            is_trailing: params.is_trailing,
            trailing_distance: params.trailing_distance,
            highest_price: params.entry_price,
            lowest_price: params.entry_price,
            status: StopLossStatus::Active,
            trigger_price: None,
            execution_price: None,
            execution_time: None,
            realized_pnl: None,
            slippage_pct: None,
            created_at: now,
            updated_at: now,
            expires_at: params.expires_at,
        }
    }

    /// Stop below entry for longs, above entry for shorts.
    pub fn compute_stop_price(side: Side, entry_price: Decimal, stop_loss_pct: Decimal) -> Decimal {
        let offset = entry_price * stop_loss_pct;
        match side {
            Side::Long => entry_price - offset,
            Side::Short => entry_price + offset,
        }
    }

    /// Loss taken if the stop fills exactly at its price.
    pub fn risk_amount(&self) -> Decimal {
        (self.entry_price - self.stop_price).abs() * self.position_size
    }

    pub fn is_active(&self) -> bool {
        self.status == StopLossStatus::Active
    }

    /// Only active orders trigger.
    pub fn should_trigger(&self, price: Decimal) -> bool {
        if !self.is_active() {
            return false;
        }
        match self.side {
            Side::Long => price <= self.stop_price,
            Side::Short => price >= self.stop_price,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    /// Ratchets a trailing stop toward `current_price`.
    ///
    /// The stop only ever tightens: up for longs, down for shorts. Returns
    /// whether the stop price moved.
    pub fn update_trailing_stop(&mut self, current_price: Decimal, now: DateTime<Utc>) -> bool {
        if !self.is_trailing || !self.is_active() || current_price <= Decimal::ZERO {
            return false;
        }

        let updated = match self.side {
            Side::Long => {
                if current_price > self.highest_price {
                    self.highest_price = current_price;
                }
                let candidate = self.highest_price - self.highest_price * self.trailing_distance;
                if candidate > self.stop_price {
                    self.stop_price = candidate;
                    true
                } else {
                    false
                }
            }
            Side::Short => {
                if current_price < self.lowest_price {
                    self.lowest_price = current_price;
                }
                let candidate = self.lowest_price + self.lowest_price * self.trailing_distance;
                if candidate < self.stop_price {
                    self.stop_price = candidate;
                    true
                } else {
                    false
                }
            }
        };

        if updated {
            self.updated_at = now;
        }
        updated
    }

    fn transition(&mut self, to: StopLossStatus, now: DateTime<Utc>) -> Result<(), DomainError> {
        use StopLossStatus::*;
        let legal = matches!(
            (self.status, to),
            (Active, Triggered)
                | (Triggered, Executed)
                | (Triggered, Active)
                | (Active, Cancelled)
                | (Active, Expired)
        );
        if !legal {
            return Err(DomainError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        self.updated_at = now;
        Ok(())
    }

    pub fn mark_triggered(&mut self, trigger_price: Decimal, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.transition(StopLossStatus::Triggered, now)?;
        self.trigger_price = Some(trigger_price);
        Ok(())
    }

    pub fn mark_executed(
        &mut self,
        execution_price: Decimal,
        realized_pnl: Decimal,
        slippage_pct: Decimal,
        now: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        self.transition(StopLossStatus::Executed, now)?;
        self.execution_price = Some(execution_price);
        self.execution_time = Some(now);
        self.realized_pnl = Some(realized_pnl);
        self.slippage_pct = Some(slippage_pct);
        Ok(())
    }

    /// Returns a triggered order to `Active` after a failed execution.
    pub fn rollback(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.transition(StopLossStatus::Active, now)?;
        self.trigger_price = None;
        Ok(())
    }

    pub fn cancel(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.transition(StopLossStatus::Cancelled, now)
    }

    pub fn expire(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.transition(StopLossStatus::Expired, now)
    }
}
