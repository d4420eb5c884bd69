//! In-process gateway implementations for paper trading and tests.

use super::{GatewayError, MarketOrder, OrderExecutor, PriceFeed};
use async_trait::async_trait;
use rust_decimal::Decimal;
use sentinel_domain::enums::OrderSide;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Price feed backed by a map that callers update directly.
#[derive(Debug, Default)]
pub struct StaticPriceFeed {
    prices: RwLock<HashMap<(String, String), Decimal>>,
}

impl StaticPriceFeed {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_price(&self, exchange: &str, symbol: &str, price: Decimal) {
        self.prices
            .write()
            .await
            .insert((exchange.to_string(), symbol.to_string()), price);
    }

    /// Replaces every price at once.
    pub async fn replace_all(&self, prices: HashMap<(String, String), Decimal>) {
        *self.prices.write().await = prices;
    }
}

#[async_trait]
impl PriceFeed for StaticPriceFeed {
    async fn fetch_ticker(&self, exchange: &str, symbol: &str) -> Result<Decimal, GatewayError> {
        self.prices
            .read()
            .await
            .get(&(exchange.to_string(), symbol.to_string()))
            .copied()
            .ok_or_else(|| GatewayError::PriceUnavailable {
                exchange: exchange.to_string(),
                symbol: symbol.to_string(),
            })
    }
}

/// Fills every order at its reference price moved against the order by a
/// fixed slippage.
#[derive(Debug, Clone)]
pub struct SimulatedExecutor {
    slippage: Decimal,
}

impl SimulatedExecutor {
    /// 0.1% adverse slippage.
    pub const DEFAULT_SLIPPAGE: Decimal = Decimal::from_parts(1, 0, 0, false, 3);

    #[must_use]
    pub fn new(slippage: Decimal) -> Self {
        Self { slippage }
    }
}

impl Default for SimulatedExecutor {
    fn default() -> Self {
        Self::new(Self::DEFAULT_SLIPPAGE)
    }
}

#[async_trait]
impl OrderExecutor for SimulatedExecutor {
    async fn execute_order(&self, order: &MarketOrder) -> Result<Decimal, GatewayError> {
        if order.reference_price <= Decimal::ZERO {
            return Err(GatewayError::Rejected(format!(
                "invalid reference price {}",
                order.reference_price
            )));
        }
        if order.size <= Decimal::ZERO {
            return Err(GatewayError::Rejected(format!("invalid size {}", order.size)));
        }
        let fill = match order.side {
            OrderSide::Sell => order.reference_price * (Decimal::ONE - self.slippage),
            OrderSide::Buy => order.reference_price * (Decimal::ONE + self.slippage),
        };
        debug!(
            client_order_id = %order.client_order_id,
            symbol = %order.symbol,
            side = ?order.side,
            size = %order.size,
            fill = %fill,
            "Simulated fill"
        );
        Ok(fill)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn order(side: OrderSide, price: Decimal) -> MarketOrder {
        MarketOrder {
            client_order_id: "t-1".to_string(),
            exchange: "binance".to_string(),
            symbol: "BTC/USDT".to_string(),
            side,
            size: dec!(1),
            reference_price: price,
            reduce_only: true,
        }
    }

    #[tokio::test]
    async fn test_static_price_feed() {
        let feed = StaticPriceFeed::new();
        assert!(matches!(
            feed.fetch_ticker("binance", "BTC/USDT").await,
            Err(GatewayError::PriceUnavailable { .. })
        ));
        feed.set_price("binance", "BTC/USDT", dec!(64000)).await;
        assert_eq!(
            feed.fetch_ticker("binance", "BTC/USDT").await.unwrap(),
            dec!(64000)
        );
    }

    #[tokio::test]
    async fn test_simulated_fills_are_adverse() {
        let executor = SimulatedExecutor::default();
        assert_eq!(SimulatedExecutor::DEFAULT_SLIPPAGE, dec!(0.001));
        let sell = executor
            .execute_order(&order(OrderSide::Sell, dec!(1000)))
            .await
            .unwrap();
        let buy = executor
            .execute_order(&order(OrderSide::Buy, dec!(1000)))
            .await
            .unwrap();
        assert_eq!(sell, dec!(999));
        assert_eq!(buy, dec!(1001));
        assert!(
            executor
                .execute_order(&order(OrderSide::Sell, dec!(0)))
                .await
                .is_err()
        );
    }
}
