//! Paper-trading inputs for `sentinel run`.
//!
//! A JSON file supplies ticker prices and, optionally, the fills that open
//! positions:
//!
//! ```json
//! {
//!   "prices": { "binance": { "BTC/USDT": "50000" } },
//!   "fills": [
//!     { "position_id": "p1", "exchange": "binance", "symbol": "BTC/USDT",
//!       "side": "long", "size": "0.1", "price": "49500" }
//!   ]
//! }
//! ```

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sentinel_domain::entities::{Fill, KillSwitchState};
use sentinel_domain::enums::Side;
use sentinel_execution::prelude::{ExecutionResult, Notifier, NotifyError, PositionTracker, StaticPriceFeed};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct PaperFill {
    position_id: String,
    #[serde(default)]
    order_id: Option<String>,
    exchange: String,
    symbol: String,
    side: String,
    size: Decimal,
    price: Decimal,
}

/// Parsed contents of a price file.
#[derive(Debug, Default, Deserialize)]
pub struct PaperMarket {
    /// exchange -> symbol -> price
    #[serde(default)]
    pub prices: HashMap<String, HashMap<String, Decimal>>,
    #[serde(default)]
    fills: Vec<PaperFill>,
}

impl PaperMarket {
    pub fn parse(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("malformed price file")
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("cannot read {}", path.display()))?;
        Self::parse(&raw)
    }

    pub fn flat_prices(&self) -> HashMap<(String, String), Decimal> {
        self.prices
            .iter()
            .flat_map(|(exchange, symbols)| {
                symbols
                    .iter()
                    .map(move |(symbol, price)| ((exchange.clone(), symbol.clone()), *price))
            })
            .collect()
    }

    /// Fills with validated sides.
    pub fn fills(&self) -> Result<Vec<Fill>> {
        self.fills
            .iter()
            .map(|f| {
                let side: Side = f
                    .side
                    .parse()
                    .with_context(|| format!("fill for {}", f.position_id))?;
                Ok(Fill {
                    position_id: f.position_id.clone(),
                    order_id: f
                        .order_id
                        .clone()
                        .unwrap_or_else(|| format!("paper-{}", f.position_id)),
                    exchange: f.exchange.clone(),
                    symbol: f.symbol.clone(),
                    side,
                    size: f.size,
                    price: f.price,
                    timestamp: Utc::now(),
                })
            })
            .collect()
    }
}

/// Re-reads the price file into a `StaticPriceFeed`.
pub struct PriceFileFeed {
    path: PathBuf,
    feed: Arc<StaticPriceFeed>,
}

impl PriceFileFeed {
    pub fn new(path: impl Into<PathBuf>, feed: Arc<StaticPriceFeed>) -> Self {
        Self {
            path: path.into(),
            feed,
        }
    }

    /// Replaces every price with the file's content. A bad read keeps the
    /// previous prices.
    pub async fn refresh(&self) {
        match PaperMarket::load(&self.path).await {
            Ok(market) => {
                let prices = market.flat_prices();
                debug!(instruments = prices.len(), "Reloaded paper prices");
                self.feed.replace_all(prices).await;
            }
            Err(e) => warn!(path = %self.path.display(), error = %e, "Price file reload failed"),
        }
    }
}

/// Closes tracked positions when their stop-loss executes.
pub struct PositionCloser {
    tracker: Arc<PositionTracker>,
}

impl PositionCloser {
    pub fn new(tracker: Arc<PositionTracker>) -> Self {
        Self { tracker }
    }
}

#[async_trait]
impl Notifier for PositionCloser {
    async fn notify_kill_switch_triggered(&self, _state: &KillSwitchState) -> Result<(), NotifyError> {
        Ok(())
    }

    async fn notify_kill_switch_recovered(&self, _state: &KillSwitchState) -> Result<(), NotifyError> {
        Ok(())
    }

    async fn notify_stop_loss_executed(&self, result: &ExecutionResult) -> Result<(), NotifyError> {
        if !result.success {
            return Ok(());
        }
        self.tracker
            .close_position(&result.position_id, result.execution_price)
            .await
            .map(|_| ())
            .map_err(|e| NotifyError(e.to_string()))
    }
}
