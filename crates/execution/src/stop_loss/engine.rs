//! Stop-loss order book and execution.

use super::{ExecutionResult, StopLossError};
use crate::gateway::{GatewayError, ImbalanceProvider, MarketOrder, OrderExecutor, PriceFeed};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sentinel_domain::entities::{NewStopLoss, StopLossOrder};
use sentinel_domain::enums::Side;
use sentinel_domain::metrics::{realized_pnl, slippage_pct};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Configuration for the stop-loss engine.
#[derive(Debug, Clone)]
pub struct StopLossConfig {
    /// Percentage used when a request carries none (fraction of entry).
    pub default_stop_loss_pct: Decimal,
    /// Percentage forced by `create_tight_stop_loss`.
    pub tight_stop_loss_pct: Decimal,
    /// Lower bound for any order.
    pub min_stop_loss_pct: Decimal,
    /// Upper bound for any order.
    pub max_stop_loss_pct: Decimal,
    /// Largest loss a single stop may lock in.
    pub max_position_risk_usd: Decimal,
    /// Imbalance strength treated as a strong signal.
    pub strong_imbalance_threshold: Decimal,
    /// Multiplier applied to the tight percentage on a strong adverse signal.
    pub tighten_multiplier: Decimal,
    /// How long terminal orders stay queryable.
    pub terminal_retention: Duration,
    /// Upper bound on a single executor call.
    pub execution_timeout: Duration,
}

impl Default for StopLossConfig {
    fn default() -> Self {
        Self {
            default_stop_loss_pct: Decimal::new(2, 2),     // 2%
            tight_stop_loss_pct: Decimal::new(1, 2),       // 1%
            min_stop_loss_pct: Decimal::new(5, 3),         // 0.5%
            max_stop_loss_pct: Decimal::new(10, 2),        // 10%
            max_position_risk_usd: Decimal::new(1000, 0),
            strong_imbalance_threshold: Decimal::new(7, 1), // 0.7
            tighten_multiplier: Decimal::new(8, 1),        // 20% tighter
            terminal_retention: Duration::from_secs(24 * 60 * 60),
            execution_timeout: Duration::from_secs(10),
        }
    }
}

/// Caller-facing parameters for a new stop.
#[derive(Debug, Clone)]
pub struct StopLossParams {
    pub position_id: String,
    pub symbol: String,
    pub exchange: String,
    pub side: Side,
    pub entry_price: Decimal,
    pub position_size: Decimal,
    /// Fraction of entry; the configured default when `None`.
    pub stop_loss_pct: Option<Decimal>,
    pub is_trailing: bool,
    /// Fraction of price between market and stop; the stop percentage when `None`.
    pub trailing_distance: Option<Decimal>,
    pub expires_in: Option<Duration>,
}

impl StopLossParams {
    /// Plain, non-trailing stop with the default percentage.
    pub fn new(
        position_id: impl Into<String>,
        exchange: impl Into<String>,
        symbol: impl Into<String>,
        side: Side,
        entry_price: Decimal,
        position_size: Decimal,
    ) -> Self {
        Self {
            position_id: position_id.into(),
            symbol: symbol.into(),
            exchange: exchange.into(),
            side,
            entry_price,
            position_size,
            stop_loss_pct: None,
            is_trailing: false,
            trailing_distance: None,
            expires_in: None,
        }
    }

    #[must_use]
    pub fn with_pct(mut self, pct: Decimal) -> Self {
        self.stop_loss_pct = Some(pct);
        self
    }

    #[must_use]
    pub fn trailing(mut self, distance: Decimal) -> Self {
        self.is_trailing = true;
        self.trailing_distance = Some(distance);
        self
    }

    #[must_use]
    pub fn expires_in(mut self, ttl: Duration) -> Self {
        self.expires_in = Some(ttl);
        self
    }
}

/// Outcome of a deadline-bounded evaluation pass.
#[derive(Debug, Clone, Default)]
pub struct EvaluationPass {
    /// Every execution attempted before the pass ended.
    pub results: Vec<ExecutionResult>,
    /// True when the deadline cut the pass short.
    pub timed_out: bool,
}

#[derive(Default)]
struct OrderBook {
    orders: HashMap<String, StopLossOrder>,
    /// position id -> order id
    by_position: HashMap<String, String>,
}

/// Owns every stop-loss order.
pub struct StopLossEngine {
    book: RwLock<OrderBook>,
    price_feed: Arc<dyn PriceFeed>,
    imbalance: Option<Arc<dyn ImbalanceProvider>>,
    executor: Arc<dyn OrderExecutor>,
    config: StopLossConfig,
}

impl StopLossEngine {
    /// Creates a new stop-loss engine.
    pub fn new(
        price_feed: Arc<dyn PriceFeed>,
        executor: Arc<dyn OrderExecutor>,
        config: StopLossConfig,
    ) -> Self {
        Self {
            book: RwLock::new(OrderBook::default()),
            price_feed,
            imbalance: None,
            executor,
            config,
        }
    }

    /// Enables signal-based tightening in `create_tight_stop_loss`.
    #[must_use]
    pub fn with_imbalance_provider(mut self, provider: Arc<dyn ImbalanceProvider>) -> Self {
        self.imbalance = Some(provider);
        self
    }

    pub fn config(&self) -> &StopLossConfig {
        &self.config
    }

    /// Validates and registers a new stop.
    ///
    /// Nothing is stored unless every check passes.
    ///
    /// # Errors
    /// Returns `Validation` for malformed input, `RiskLimit` when the
    /// percentage or the locked-in loss is out of bounds, and `Duplicate` if
    /// the position already has a live order.
    pub async fn create_stop_loss(&self, params: StopLossParams) -> Result<StopLossOrder, StopLossError> {
        if params.position_id.trim().is_empty() {
            return Err(StopLossError::Validation("position_id is required".to_string()));
        }
        if params.symbol.trim().is_empty() {
            return Err(StopLossError::Validation("symbol is required".to_string()));
        }
        if params.entry_price <= Decimal::ZERO {
            return Err(StopLossError::Validation(format!(
                "entry price must be positive, got {}",
                params.entry_price
            )));
        }
        if params.position_size <= Decimal::ZERO {
            return Err(StopLossError::Validation(format!(
                "position size must be positive, got {}",
                params.position_size
            )));
        }

        let pct = params
            .stop_loss_pct
            .unwrap_or(self.config.default_stop_loss_pct);
        if pct < self.config.min_stop_loss_pct || pct > self.config.max_stop_loss_pct {
            return Err(StopLossError::RiskLimit(format!(
                "stop-loss percentage {} outside [{}, {}]",
                pct, self.config.min_stop_loss_pct, self.config.max_stop_loss_pct
            )));
        }

        let trailing_distance = params.trailing_distance.unwrap_or(pct);
        if params.is_trailing && (trailing_distance <= Decimal::ZERO || trailing_distance >= Decimal::ONE) {
            return Err(StopLossError::Validation(format!(
                "trailing distance must be in (0, 1), got {trailing_distance}"
            )));
        }

        let stop_price = StopLossOrder::compute_stop_price(params.side, params.entry_price, pct);
        let risk = (params.entry_price - stop_price).abs() * params.position_size;
        if risk > self.config.max_position_risk_usd {
            return Err(StopLossError::RiskLimit(format!(
                "position risk {} USD exceeds max {} USD",
                risk, self.config.max_position_risk_usd
            )));
        }

        let now = Utc::now();
        let expires_at = match params.expires_in {
            Some(ttl) => {
                let ttl = chrono::Duration::from_std(ttl)
                    .map_err(|_| StopLossError::Validation(format!("expiry {ttl:?} out of range")))?;
                Some(now + ttl)
            }
            None => None,
        };

        let order = StopLossOrder::new(
            NewStopLoss {
                position_id: params.position_id,
                symbol: params.symbol,
                exchange: params.exchange,
                side: params.side,
                entry_price: params.entry_price,
                position_size: params.position_size,
                stop_loss_pct: pct,
                is_trailing: params.is_trailing,
                trailing_distance,
                expires_at,
            },
            now,
        );

        {
            let mut book = self.book.write().await;
            if let Some(existing) = book
                .by_position
                .get(&order.position_id)
                .and_then(|id| book.orders.get(id))
                && !existing.status.is_terminal()
            {
                return Err(StopLossError::Duplicate(order.position_id.clone()));
            }
            book.by_position
                .insert(order.position_id.clone(), order.id.clone());
            book.orders.insert(order.id.clone(), order.clone());
        }

        info!(
            order_id = %order.id,
            position_id = %order.position_id,
            symbol = %order.symbol,
            side = %order.side,
            stop_price = %order.stop_price,
            stop_loss_pct = %pct,
            trailing = order.is_trailing,
            "Stop-loss created"
        );
        Ok(order)
    }

    /// Creates a stop at the tight percentage, tightened further when the
    /// order book leans strongly against the position.
    ///
    /// # Errors
    /// Same as `create_stop_loss`. A failed signal fetch is not an error.
    pub async fn create_tight_stop_loss(
        &self,
        mut params: StopLossParams,
    ) -> Result<StopLossOrder, StopLossError> {
        let mut pct = self.config.tight_stop_loss_pct;

        if let Some(provider) = &self.imbalance {
            match provider
                .fetch_order_book_imbalance(&params.exchange, &params.symbol)
                .await
            {
                Ok(signal) if signal.is_strong_against(params.side, self.config.strong_imbalance_threshold) => {
                    pct *= self.config.tighten_multiplier;
                    info!(
                        position_id = %params.position_id,
                        direction = ?signal.direction,
                        strength = %signal.strength,
                        stop_loss_pct = %pct,
                        "Adverse order-book imbalance, tightening stop"
                    );
                }
                Ok(_) => {}
                Err(e) => warn!(
                    symbol = %params.symbol,
                    error = %e,
                    "Imbalance signal unavailable, using tight percentage"
                ),
            }
        }

        params.stop_loss_pct = Some(pct);
        self.create_stop_loss(params).await
    }

    pub async fn get_stop_loss(&self, order_id: &str) -> Option<StopLossOrder> {
        self.book.read().await.orders.get(order_id).cloned()
    }

    /// Most recent order registered for a position.
    pub async fn get_stop_loss_by_position(&self, position_id: &str) -> Option<StopLossOrder> {
        let book = self.book.read().await;
        book.by_position
            .get(position_id)
            .and_then(|id| book.orders.get(id))
            .cloned()
    }

    /// Active orders, oldest first.
    pub async fn active_orders(&self) -> Vec<StopLossOrder> {
        let mut orders: Vec<StopLossOrder> = self
            .book
            .read()
            .await
            .orders
            .values()
            .filter(|o| o.is_active())
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.created_at);
        orders
    }

    /// Cancels an active order.
    ///
    /// # Errors
    /// Returns `NotFound` for unknown ids and `Domain` if the order is not active.
    pub async fn cancel_stop_loss(&self, order_id: &str) -> Result<StopLossOrder, StopLossError> {
        let order = {
            let mut book = self.book.write().await;
            let order = book
                .orders
                .get_mut(order_id)
                .ok_or_else(|| StopLossError::NotFound(order_id.to_string()))?;
            order.cancel(Utc::now())?;
            order.clone()
        };
        info!(order_id = %order.id, position_id = %order.position_id, "Stop-loss cancelled");
        Ok(order)
    }

    /// Feeds a price to a trailing order. Returns whether the stop moved.
    ///
    /// # Errors
    /// Returns `NotFound` for unknown ids.
    pub async fn update_trailing_stop(
        &self,
        order_id: &str,
        current_price: Decimal,
    ) -> Result<bool, StopLossError> {
        let mut book = self.book.write().await;
        let order = book
            .orders
            .get_mut(order_id)
            .ok_or_else(|| StopLossError::NotFound(order_id.to_string()))?;
        let moved = order.update_trailing_stop(current_price, Utc::now());
        if moved {
            debug!(order_id = %order_id, stop_price = %order.stop_price, "Trailing stop moved");
        }
        Ok(moved)
    }

    /// One pass over the book: expire, trail, trigger, prune.
    ///
    /// A failed price fetch skips only that order. Failed executions are
    /// reported with `success == false`.
    pub async fn evaluate(&self) -> Vec<ExecutionResult> {
        self.run_pass(None).await.results
    }

    /// Same as `evaluate`, but stops before `deadline`.
    ///
    /// The deadline is checked between orders and bounds each price fetch
    /// and executor call, so an order is never left half-executed: an
    /// executor call cut off by the deadline is rolled back like any other
    /// execution failure.
    pub async fn evaluate_before(&self, deadline: Instant) -> EvaluationPass {
        self.run_pass(Some(deadline)).await
    }

    async fn run_pass(&self, deadline: Option<Instant>) -> EvaluationPass {
        let now = Utc::now();
        self.expire_orders(now).await;

        let targets: Vec<(String, String, String)> = self
            .active_orders()
            .await
            .into_iter()
            .map(|o| (o.id, o.exchange, o.symbol))
            .collect();

        let mut pass = EvaluationPass::default();
        for (order_id, exchange, symbol) in targets {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                pass.timed_out = true;
                break;
            }

            let fetch = self.price_feed.fetch_ticker(&exchange, &symbol);
            let fetched = match deadline {
                Some(d) => match tokio::time::timeout_at(d, fetch).await {
                    Ok(fetched) => fetched,
                    Err(_) => {
                        warn!(order_id = %order_id, symbol = %symbol, "Evaluation deadline reached during price fetch");
                        pass.timed_out = true;
                        break;
                    }
                },
                None => fetch.await,
            };
            let price = match fetched {
                Ok(price) => price,
                Err(e) => {
                    warn!(order_id = %order_id, symbol = %symbol, error = %e, "Price fetch failed, skipping order");
                    continue;
                }
            };

            let should_trigger = {
                let mut book = self.book.write().await;
                let Some(order) = book.orders.get_mut(&order_id) else {
                    continue;
                };
                if !order.is_active() {
                    continue;
                }
                if order.is_trailing && order.update_trailing_stop(price, Utc::now()) {
                    debug!(order_id = %order_id, stop_price = %order.stop_price, "Trailing stop moved");
                }
                order.should_trigger(price)
            };

            if !should_trigger {
                continue;
            }

            let limit = match deadline {
                Some(d) => self
                    .config
                    .execution_timeout
                    .min(d.saturating_duration_since(Instant::now())),
                None => self.config.execution_timeout,
            };
            match self.execute_within(&order_id, price, limit).await {
                Ok(result) => pass.results.push(result),
                Err(e) => pass.results.push(ExecutionResult {
                    order_id: order_id.clone(),
                    position_id: self
                        .get_stop_loss(&order_id)
                        .await
                        .map(|o| o.position_id)
                        .unwrap_or_default(),
                    symbol,
                    trigger_price: price,
                    execution_price: None,
                    realized_pnl: None,
                    slippage_pct: None,
                    success: false,
                    error: Some(e.to_string()),
                    executed_at: Utc::now(),
                }),
            }
        }

        if deadline.is_some_and(|d| Instant::now() >= d) {
            pass.timed_out = true;
        }
        self.prune_terminal_orders().await;
        pass
    }

    async fn expire_orders(&self, now: DateTime<Utc>) {
        let mut book = self.book.write().await;
        for order in book.orders.values_mut() {
            if order.is_active() && order.is_expired(now) && order.expire(now).is_ok() {
                info!(order_id = %order.id, position_id = %order.position_id, "Stop-loss expired");
            }
        }
    }

    /// Triggers and executes an order at `trigger_price`.
    ///
    /// On executor failure or timeout the order goes back to `Active` so a
    /// later pass can trigger it again, and the error is returned.
    ///
    /// # Errors
    /// Returns `NotFound`, `Domain` if the order is not active, or `Execution`.
    pub async fn execute_stop_loss(
        &self,
        order_id: &str,
        trigger_price: Decimal,
    ) -> Result<ExecutionResult, StopLossError> {
        self.execute_within(order_id, trigger_price, self.config.execution_timeout)
            .await
    }

    async fn execute_within(
        &self,
        order_id: &str,
        trigger_price: Decimal,
        limit: Duration,
    ) -> Result<ExecutionResult, StopLossError> {
        let order = {
            let mut book = self.book.write().await;
            let order = book
                .orders
                .get_mut(order_id)
                .ok_or_else(|| StopLossError::NotFound(order_id.to_string()))?;
            order.mark_triggered(trigger_price, Utc::now())?;
            order.clone()
        };

        warn!(
            order_id = %order.id,
            position_id = %order.position_id,
            symbol = %order.symbol,
            trigger_price = %trigger_price,
            stop_price = %order.stop_price,
            "Stop-loss triggered"
        );

        let market_order = MarketOrder {
            client_order_id: format!("sl-{}", order.id),
            exchange: order.exchange.clone(),
            symbol: order.symbol.clone(),
            side: order.side.closing_order_side(),
            size: order.position_size,
            reference_price: trigger_price,
            reduce_only: true,
        };

        let outcome = match tokio::time::timeout(limit, self.executor.execute_order(&market_order)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(GatewayError::Timeout(limit)),
        };
        let fill_price = match outcome {
            Ok(price) => price,
            Err(source) => {
                let mut book = self.book.write().await;
                if let Some(order) = book.orders.get_mut(order_id)
                    && let Err(e) = order.rollback(Utc::now())
                {
                    warn!(order_id = %order_id, error = %e, "Rollback after failed execution was refused");
                }
                drop(book);
                warn!(order_id = %order_id, error = %source, "Stop-loss execution failed, order re-armed");
                return Err(StopLossError::Execution {
                    order_id: order_id.to_string(),
                    source,
                });
            }
        };

        let pnl = realized_pnl(order.side, order.entry_price, fill_price, order.position_size);
        let slippage = slippage_pct(trigger_price, fill_price);
        let now = Utc::now();
        {
            let mut book = self.book.write().await;
            let stored = book
                .orders
                .get_mut(order_id)
                .ok_or_else(|| StopLossError::NotFound(order_id.to_string()))?;
            stored.mark_executed(fill_price, pnl, slippage, now)?;
        }

        info!(
            order_id = %order.id,
            position_id = %order.position_id,
            execution_price = %fill_price,
            realized_pnl = %pnl,
            slippage_pct = %slippage,
            "Stop-loss executed"
        );

        Ok(ExecutionResult {
            order_id: order.id,
            position_id: order.position_id,
            symbol: order.symbol,
            trigger_price,
            execution_price: Some(fill_price),
            realized_pnl: Some(pnl),
            slippage_pct: Some(slippage),
            success: true,
            error: None,
            executed_at: now,
        })
    }

    /// Drops terminal orders older than the retention window. Returns how
    /// many were removed.
    pub async fn prune_terminal_orders(&self) -> usize {
        let Ok(retention) = chrono::Duration::from_std(self.config.terminal_retention) else {
            return 0;
        };
        let cutoff = Utc::now() - retention;

        let mut book = self.book.write().await;
        let expired: Vec<(String, String)> = book
            .orders
            .values()
            .filter(|o| o.status.is_terminal() && o.updated_at <= cutoff)
            .map(|o| (o.id.clone(), o.position_id.clone()))
            .collect();

        for (order_id, position_id) in &expired {
            book.orders.remove(order_id);
            if book.by_position.get(position_id) == Some(order_id) {
                book.by_position.remove(position_id);
            }
        }
        if !expired.is_empty() {
            debug!(removed = expired.len(), "Pruned terminal stop-loss orders");
        }
        expired.len()
    }

    pub async fn order_count(&self) -> usize {
        self.book.read().await.orders.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{
        GatewayError, ImbalanceDirection, OrderBookImbalance, SimulatedExecutor, StaticPriceFeed,
    };
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use sentinel_domain::enums::StopLossStatus;

    struct FixedImbalance(Result<OrderBookImbalance, GatewayError>);

    #[async_trait]
    impl ImbalanceProvider for FixedImbalance {
        async fn fetch_order_book_imbalance(
            &self,
            _exchange: &str,
            _symbol: &str,
        ) -> Result<OrderBookImbalance, GatewayError> {
            self.0.clone()
        }
    }

    struct RejectingExecutor;

    #[async_trait]
    impl OrderExecutor for RejectingExecutor {
        async fn execute_order(&self, _order: &MarketOrder) -> Result<Decimal, GatewayError> {
            Err(GatewayError::Rejected("insufficient margin".to_string()))
        }
    }

    struct HangingExecutor;

    #[async_trait]
    impl OrderExecutor for HangingExecutor {
        async fn execute_order(&self, _order: &MarketOrder) -> Result<Decimal, GatewayError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Decimal::ONE)
        }
    }

    fn engine(feed: Arc<StaticPriceFeed>) -> StopLossEngine {
        StopLossEngine::new(feed, Arc::new(SimulatedExecutor::default()), StopLossConfig::default())
    }

    fn params(position_id: &str, side: Side) -> StopLossParams {
        StopLossParams::new(position_id, "binance", "ETH/USDT", side, dec!(100), dec!(10))
    }

    #[tokio::test]
    async fn test_create_uses_default_pct() {
        let engine = engine(Arc::new(StaticPriceFeed::new()));
        let order = engine.create_stop_loss(params("p1", Side::Long)).await.unwrap();
        assert_eq!(order.stop_price, dec!(98));
        assert_eq!(order.status, StopLossStatus::Active);

        let short = engine.create_stop_loss(params("p2", Side::Short)).await.unwrap();
        assert_eq!(short.stop_price, dec!(102));
    }

    #[tokio::test]
    async fn test_create_rejects_out_of_bounds() {
        let engine = engine(Arc::new(StaticPriceFeed::new()));

        let err = engine
            .create_stop_loss(params("p1", Side::Long).with_pct(dec!(0.001)))
            .await
            .unwrap_err();
        assert!(matches!(err, StopLossError::RiskLimit(_)));

        let err = engine
            .create_stop_loss(params("p1", Side::Long).with_pct(dec!(0.2)))
            .await
            .unwrap_err();
        assert!(matches!(err, StopLossError::RiskLimit(_)));

        let mut bad = params("p1", Side::Long);
        bad.entry_price = Decimal::ZERO;
        assert!(matches!(
            engine.create_stop_loss(bad).await,
            Err(StopLossError::Validation(_))
        ));

        let err = engine
            .create_stop_loss(StopLossParams::new(
                "big",
                "binance",
                "ETH/USDT",
                Side::Long,
                dec!(100),
                dec!(1000000),
            ).with_pct(dec!(0.05)))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("exceeds max"));
        assert_eq!(engine.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_one_live_order_per_position() {
        let engine = engine(Arc::new(StaticPriceFeed::new()));
        let first = engine.create_stop_loss(params("p1", Side::Long)).await.unwrap();
        assert!(matches!(
            engine.create_stop_loss(params("p1", Side::Long)).await,
            Err(StopLossError::Duplicate(_))
        ));

        engine.cancel_stop_loss(&first.id).await.unwrap();
        let second = engine.create_stop_loss(params("p1", Side::Long)).await.unwrap();
        assert_eq!(
            engine.get_stop_loss_by_position("p1").await.unwrap().id,
            second.id
        );
        assert!(matches!(
            engine.cancel_stop_loss(&first.id).await,
            Err(StopLossError::Domain(_))
        ));
    }

    #[tokio::test]
    async fn test_tight_stop_tightens_on_adverse_signal() {
        let signal = OrderBookImbalance {
            direction: ImbalanceDirection::Ask,
            strength: dec!(0.9),
        };
        let engine = engine(Arc::new(StaticPriceFeed::new()))
            .with_imbalance_provider(Arc::new(FixedImbalance(Ok(signal))));

        let long = engine.create_tight_stop_loss(params("p1", Side::Long)).await.unwrap();
        assert_eq!(long.stop_loss_pct, dec!(0.008));
        assert_eq!(long.stop_price, dec!(99.2));

        // ask pressure favours a short
        let short = engine.create_tight_stop_loss(params("p2", Side::Short)).await.unwrap();
        assert_eq!(short.stop_loss_pct, dec!(0.01));
    }

    #[tokio::test]
    async fn test_tight_stop_survives_signal_failure() {
        let engine = engine(Arc::new(StaticPriceFeed::new())).with_imbalance_provider(Arc::new(
            FixedImbalance(Err(GatewayError::Request("timeout".to_string()))),
        ));
        let order = engine.create_tight_stop_loss(params("p1", Side::Long)).await.unwrap();
        assert_eq!(order.stop_price, dec!(99));
    }

    #[tokio::test]
    async fn test_evaluate_executes_triggered_order() {
        let feed = Arc::new(StaticPriceFeed::new());
        feed.set_price("binance", "ETH/USDT", dec!(100)).await;
        let engine = engine(feed.clone());
        let order = engine
            .create_stop_loss(params("p1", Side::Long).with_pct(dec!(0.05)))
            .await
            .unwrap();

        assert!(engine.evaluate().await.is_empty());

        feed.set_price("binance", "ETH/USDT", dec!(94)).await;
        let results = engine.evaluate().await;
        assert_eq!(results.len(), 1);
        let result = &results[0];
        assert!(result.success);
        assert_eq!(result.execution_price, Some(dec!(93.906)));
        assert_eq!(result.realized_pnl, Some(dec!(-60.94)));
        assert_eq!(result.slippage_pct, Some(dec!(0.001)));

        let stored = engine.get_stop_loss(&order.id).await.unwrap();
        assert_eq!(stored.status, StopLossStatus::Executed);
        assert!(engine.active_orders().await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_execution_rolls_back_to_active() {
        let feed = Arc::new(StaticPriceFeed::new());
        feed.set_price("binance", "ETH/USDT", dec!(90)).await;
        let engine = StopLossEngine::new(feed, Arc::new(RejectingExecutor), StopLossConfig::default());
        let order = engine.create_stop_loss(params("p1", Side::Long)).await.unwrap();

        let err = engine.execute_stop_loss(&order.id, dec!(90)).await.unwrap_err();
        assert!(matches!(err, StopLossError::Execution { .. }));
        let stored = engine.get_stop_loss(&order.id).await.unwrap();
        assert_eq!(stored.status, StopLossStatus::Active);
        assert_eq!(stored.trigger_price, None);

        let results = engine.evaluate().await;
        assert_eq!(results.len(), 1);
        assert!(!results[0].success);
        assert!(results[0].error.as_deref().unwrap().contains("insufficient margin"));
        assert!(engine.get_stop_loss(&order.id).await.unwrap().is_active());
    }

    #[tokio::test]
    async fn test_evaluate_skips_unpriced_orders() {
        let feed = Arc::new(StaticPriceFeed::new());
        feed.set_price("binance", "BTC/USDT", dec!(1)).await;
        let engine = engine(feed);
        engine.create_stop_loss(params("p1", Side::Long)).await.unwrap();
        let mut btc = params("p2", Side::Long);
        btc.symbol = "BTC/USDT".to_string();
        engine.create_stop_loss(btc).await.unwrap();

        let results = engine.evaluate().await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].symbol, "BTC/USDT");
    }

    #[tokio::test]
    async fn test_evaluate_trails_before_trigger_check() {
        let feed = Arc::new(StaticPriceFeed::new());
        let engine = engine(feed.clone());
        let order = engine
            .create_stop_loss(params("p1", Side::Long).with_pct(dec!(0.05)).trailing(dec!(0.02)))
            .await
            .unwrap();

        feed.set_price("binance", "ETH/USDT", dec!(120)).await;
        assert!(engine.evaluate().await.is_empty());
        assert_eq!(engine.get_stop_loss(&order.id).await.unwrap().stop_price, dec!(117.6));

        feed.set_price("binance", "ETH/USDT", dec!(110)).await;
        assert_eq!(engine.evaluate().await.len(), 1);
        let stored = engine.get_stop_loss(&order.id).await.unwrap();
        assert_eq!(stored.status, StopLossStatus::Executed);
        assert_eq!(stored.trigger_price, Some(dec!(110)));
    }

    #[tokio::test]
    async fn test_update_trailing_stop_by_id() {
        let engine = engine(Arc::new(StaticPriceFeed::new()));
        let order = engine
            .create_stop_loss(params("p1", Side::Short).trailing(dec!(0.02)))
            .await
            .unwrap();
        assert!(engine.update_trailing_stop(&order.id, dec!(90)).await.unwrap());
        assert!(!engine.update_trailing_stop(&order.id, dec!(95)).await.unwrap());
        assert_eq!(engine.get_stop_loss(&order.id).await.unwrap().stop_price, dec!(91.8));
        assert!(matches!(
            engine.update_trailing_stop("nope", dec!(1)).await,
            Err(StopLossError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_expired_orders_are_not_executed() {
        let feed = Arc::new(StaticPriceFeed::new());
        feed.set_price("binance", "ETH/USDT", dec!(50)).await;
        let engine = engine(feed);
        let order = engine
            .create_stop_loss(params("p1", Side::Long).expires_in(Duration::ZERO))
            .await
            .unwrap();

        assert!(engine.evaluate().await.is_empty());
        assert_eq!(
            engine.get_stop_loss(&order.id).await.unwrap().status,
            StopLossStatus::Expired
        );
    }

    #[tokio::test]
    async fn test_prune_releases_position_index() {
        let config = StopLossConfig {
            terminal_retention: Duration::ZERO,
            ..Default::default()
        };
        let engine = StopLossEngine::new(
            Arc::new(StaticPriceFeed::new()),
            Arc::new(SimulatedExecutor::default()),
            config,
        );
        let order = engine.create_stop_loss(params("p1", Side::Long)).await.unwrap();
        engine.create_stop_loss(params("p2", Side::Long)).await.unwrap();
        engine.cancel_stop_loss(&order.id).await.unwrap();

        assert_eq!(engine.prune_terminal_orders().await, 1);
        assert_eq!(engine.order_count().await, 1);
        assert!(engine.get_stop_loss_by_position("p1").await.is_none());
        assert!(engine.get_stop_loss_by_position("p2").await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_executor_timeout_rearms_order() {
        let feed = Arc::new(StaticPriceFeed::new());
        feed.set_price("binance", "ETH/USDT", dec!(90)).await;
        let config = StopLossConfig {
            execution_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        let engine = StopLossEngine::new(feed, Arc::new(HangingExecutor), config);
        let order = engine.create_stop_loss(params("p1", Side::Long)).await.unwrap();

        let err = engine.execute_stop_loss(&order.id, dec!(90)).await.unwrap_err();
        assert!(matches!(
            err,
            StopLossError::Execution { source: GatewayError::Timeout(_), .. }
        ));
        assert_eq!(
            engine.get_stop_loss(&order.id).await.unwrap().status,
            StopLossStatus::Active
        );

        let deadline = Instant::now() + Duration::from_secs(2);
        let pass = engine.evaluate_before(deadline).await;
        assert!(pass.timed_out);
        assert_eq!(pass.results.len(), 1);
        assert!(!pass.results[0].success);
        assert_eq!(engine.active_orders().await.len(), 1);

        let cancelled = engine.cancel_stop_loss(&order.id).await.unwrap();
        assert_eq!(cancelled.status, StopLossStatus::Cancelled);
    }
}
