use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub mod pnl;

pub use pnl::{realized_pnl, slippage_pct, unrealized_pnl};

/// Gross/fees/net split of a realized trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PnLBreakdown {
    pub gross_pnl: Decimal,
    pub fees: Decimal,
    pub net_pnl: Decimal,
}

impl PnLBreakdown {
    /// Builds the breakdown charging `fee_rate` on the exit notional.
    pub fn with_fee_rate(gross_pnl: Decimal, exit_notional: Decimal, fee_rate: Decimal) -> Self {
        let fees = exit_notional.abs() * fee_rate;
        Self {
            gross_pnl,
            fees,
            net_pnl: gross_pnl - fees,
        }
    }
}
