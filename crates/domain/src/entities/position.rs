//! Positions as seen by the tracker.

use crate::enums::{PositionStatus, Side};
use crate::metrics::pnl::{realized_pnl, unrealized_pnl};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// An exchange position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub position_id: String,
    pub order_id: String,
    pub exchange: String,
    pub symbol: String,
    pub side: Side,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub current_price: Decimal,
    pub unrealized_pl: Decimal,
    pub status: PositionStatus,
    pub opened_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    /// Recomputes unrealized PnL from the current price.
    pub fn calculate_unrealized_pl(&self) -> Decimal {
        unrealized_pnl(self.side, self.entry_price, self.current_price, self.size)
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }
}

/// A fill report from the exchange.
///
/// `size` and `price` describe the resulting position (absolute size and
/// average entry), so applying the same fill twice leaves the position as if
/// it had been applied once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub position_id: String,
    pub order_id: String,
    pub exchange: String,
    pub symbol: String,
    pub side: Side,
    pub size: Decimal,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Position plus tracker bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedPosition {
    pub position: Position,
    /// Last successful price sync.
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Whether a price has been applied since the last fill.
    pub price_updated: bool,
}

impl TrackedPosition {
    /// Opens a position from its first fill.
    pub fn from_fill(fill: &Fill) -> Self {
        Self {
            position: Position {
                position_id: fill.position_id.clone(),
                order_id: fill.order_id.clone(),
                exchange: fill.exchange.clone(),
                symbol: fill.symbol.clone(),
                side: fill.side,
                size: fill.size,
                entry_price: fill.price,
                current_price: Decimal::ZERO,
                unrealized_pl: Decimal::ZERO,
                status: PositionStatus::Open,
                opened_at: fill.timestamp,
                updated_at: fill.timestamp,
            },
            last_sync_at: None,
            price_updated: false,
        }
    }

    /// Applies a subsequent fill for the same position.
    pub fn apply_fill(&mut self, fill: &Fill) {
        let position = &mut self.position;
        position.order_id = fill.order_id.clone();
        position.size = fill.size;
        position.entry_price = fill.price;
        position.updated_at = fill.timestamp;
        position.unrealized_pl = position.calculate_unrealized_pl();
        self.price_updated = false;
    }

    /// Marks the position to `price`.
    pub fn update_price(&mut self, price: Decimal, now: DateTime<Utc>) {
        let position = &mut self.position;
        position.current_price = price;
        position.unrealized_pl = position.calculate_unrealized_pl();
        position.updated_at = now;
        self.last_sync_at = Some(now);
        self.price_updated = true;
    }

    /// Moves the position to a terminal status and returns its realized PnL.
    ///
    /// With an exit price the PnL is computed at that price, otherwise the
    /// last unrealized PnL is taken as realized.
    pub fn finalize(
        &mut self,
        status: PositionStatus,
        exit_price: Option<Decimal>,
        now: DateTime<Utc>,
    ) -> Decimal {
        let position = &mut self.position;
        if let Some(price) = exit_price {
            position.current_price = price;
            position.unrealized_pl =
                realized_pnl(position.side, position.entry_price, price, position.size);
        }
        position.status = status;
        position.updated_at = now;
        position.unrealized_pl
    }

    /// Point-in-time read used by risk decisions.
    pub fn snapshot(&self, taken_at: DateTime<Utc>) -> PositionSnapshot {
        let p = &self.position;
        PositionSnapshot {
            position_id: p.position_id.clone(),
            exchange: p.exchange.clone(),
            symbol: p.symbol.clone(),
            side: p.side,
            size: p.size,
            entry_price: p.entry_price,
            mark_price: p.current_price,
            unrealized_pl: p.unrealized_pl,
            status: p.status,
            last_sync_at: self.last_sync_at,
            taken_at,
        }
    }
}

/// Immutable view of a position at the moment a decision is made.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub position_id: String,
    pub exchange: String,
    pub symbol: String,
    pub side: Side,
    pub size: Decimal,
    pub entry_price: Decimal,
    pub mark_price: Decimal,
    pub unrealized_pl: Decimal,
    pub status: PositionStatus,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub taken_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn fill(size: Decimal, price: Decimal) -> Fill {
        Fill {
            position_id: "pos-1".to_string(),
            order_id: "ord-1".to_string(),
            exchange: "binance".to_string(),
            symbol: "BTC/USDT".to_string(),
            side: Side::Long,
            size,
            price,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_from_fill_opens_position() {
        let tracked = TrackedPosition::from_fill(&fill(dec!(2), dec!(50000)));
        assert!(tracked.position.is_open());
        assert_eq!(tracked.position.size, dec!(2));
        assert_eq!(tracked.position.unrealized_pl, Decimal::ZERO);
        assert!(!tracked.price_updated);
    }

    #[test]
    fn test_update_price_recomputes_pnl() {
        let mut tracked = TrackedPosition::from_fill(&fill(dec!(2), dec!(50000)));
        tracked.update_price(dec!(49000), Utc::now());
        assert_eq!(tracked.position.unrealized_pl, dec!(-2000));
        assert!(tracked.price_updated);
        assert!(tracked.last_sync_at.is_some());
    }

    #[test]
    fn test_apply_fill_is_idempotent() {
        let mut tracked = TrackedPosition::from_fill(&fill(dec!(1), dec!(100)));
        let second = fill(dec!(3), dec!(110));
        tracked.apply_fill(&second);
        let once = tracked.clone();
        tracked.apply_fill(&second);
        assert_eq!(tracked, once);
        assert_eq!(tracked.position.size, dec!(3));
        assert_eq!(tracked.position.entry_price, dec!(110));
    }

    #[test]
    fn test_finalize_with_and_without_exit_price() {
        let mut a = TrackedPosition::from_fill(&fill(dec!(1), dec!(100)));
        a.update_price(dec!(105), Utc::now());
        assert_eq!(a.finalize(PositionStatus::Closed, None, Utc::now()), dec!(5));

        let mut b = TrackedPosition::from_fill(&fill(dec!(1), dec!(100)));
        b.update_price(dec!(105), Utc::now());
        assert_eq!(
            b.finalize(PositionStatus::Liquidated, Some(dec!(90)), Utc::now()),
            dec!(-10)
        );
        assert_eq!(b.position.status, PositionStatus::Liquidated);
    }

    #[test]
    fn test_serde_round_trip_keeps_decimals() {
        let tracked = TrackedPosition::from_fill(&fill(dec!(0.123), dec!(42000.5)));
        let json = serde_json::to_string(&tracked).unwrap();
        let back: TrackedPosition = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tracked);
    }
}
