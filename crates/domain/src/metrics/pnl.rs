//! Directional profit and loss math.

use crate::enums::Side;
use rust_decimal::Decimal;

/// Mark-to-market PnL of an open position.
///
/// Returns zero when size, entry or current price is zero, so a position
/// that has not been priced yet never reports a spurious loss.
pub fn unrealized_pnl(side: Side, entry_price: Decimal, current_price: Decimal, size: Decimal) -> Decimal {
    if size.is_zero() || entry_price.is_zero() || current_price.is_zero() {
        return Decimal::ZERO;
    }
    let price_diff = current_price - entry_price;
    match side {
        Side::Long => price_diff * size,
        Side::Short => -price_diff * size,
    }
}

/// PnL of closing `size` at `exit_price`.
pub fn realized_pnl(side: Side, entry_price: Decimal, exit_price: Decimal, size: Decimal) -> Decimal {
    match side {
        Side::Long => (exit_price - entry_price) * size,
        Side::Short => (entry_price - exit_price) * size,
    }
}

/// Relative distance between an expected and an actual price.
pub fn slippage_pct(expected: Decimal, actual: Decimal) -> Decimal {
    if expected.is_zero() {
        return Decimal::ZERO;
    }
    ((actual - expected) / expected).abs()
}
