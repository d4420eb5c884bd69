//! Capabilities consumed from the exchange side.
//!
//! The control plane never speaks an exchange protocol itself; it is handed
//! implementations of these traits:
//! - `PriceFeed` for ticker prices
//! - `ImbalanceProvider` for order-book pressure signals
//! - `OrderExecutor` for reduce-only market orders

mod simulated;

pub use simulated::{SimulatedExecutor, StaticPriceFeed};

use async_trait::async_trait;
use rust_decimal::Decimal;
use sentinel_domain::enums::{OrderSide, Side};
use serde::{Deserialize, Serialize};

/// Errors returned by exchange-facing capabilities.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// No price is available for the instrument.
    #[error("price unavailable for {exchange}:{symbol}")]
    PriceUnavailable { exchange: String, symbol: String },
    /// Transport or API failure.
    #[error("exchange request failed: {0}")]
    Request(String),
    /// The exchange refused the order.
    #[error("order rejected: {0}")]
    Rejected(String),
    /// No answer within the allotted time.
    #[error("exchange request timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Current ticker prices.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    async fn fetch_ticker(&self, exchange: &str, symbol: &str) -> Result<Decimal, GatewayError>;
}

/// Which side of the book dominates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImbalanceDirection {
    /// Buy pressure.
    Bid,
    /// Sell pressure.
    Ask,
    Neutral,
}

/// Order-book imbalance signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookImbalance {
    pub direction: ImbalanceDirection,
    /// Signal strength in 0..=1.
    pub strength: Decimal,
}

impl OrderBookImbalance {
    /// True when the book leans against a position of `side` with at least
    /// `threshold` strength.
    pub fn is_strong_against(&self, side: Side, threshold: Decimal) -> bool {
        if self.strength < threshold {
            return false;
        }
        matches!(
            (side, self.direction),
            (Side::Long, ImbalanceDirection::Ask) | (Side::Short, ImbalanceDirection::Bid)
        )
    }
}

/// Order-book imbalance signal source.
#[async_trait]
pub trait ImbalanceProvider: Send + Sync {
    async fn fetch_order_book_imbalance(
        &self,
        exchange: &str,
        symbol: &str,
    ) -> Result<OrderBookImbalance, GatewayError>;
}

/// A reduce-only market order sent by the control plane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketOrder {
    pub client_order_id: String,
    pub exchange: String,
    pub symbol: String,
    pub side: OrderSide,
    pub size: Decimal,
    /// Price the decision was made at.
    pub reference_price: Decimal,
    pub reduce_only: bool,
}

/// Order-execution boundary. Returns the fill price on success.
#[async_trait]
pub trait OrderExecutor: Send + Sync {
    async fn execute_order(&self, order: &MarketOrder) -> Result<Decimal, GatewayError>;
}
