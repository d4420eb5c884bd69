//! Controlled liquidation: risk-gated, rate-limited position unwinds.

use super::KillSwitch;
use crate::alerts::Notifier;
use crate::gateway::{MarketOrder, OrderExecutor};
use crate::monitor::PositionTracker;
use crate::scheduler::{AlreadyRunning, BackgroundLoop};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sentinel_domain::entities::{DailyLiquidationStats, LiquidationRequest, LiquidationResult};
use sentinel_domain::enums::{KillSwitchStatus, LiquidationReason, LiquidationStatus};
use sentinel_domain::metrics::{PnLBreakdown, realized_pnl, slippage_pct};
use sentinel_domain::value_objects::Percentage;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Configuration for the liquidation service.
#[derive(Debug, Clone)]
pub struct LiquidationConfig {
    /// Time between queue ticks; one request is processed per tick.
    pub queue_interval: Duration,
    /// Accepted requests per UTC day.
    pub max_daily_liquidations: u32,
    /// Default slippage tolerance (fraction).
    pub max_slippage: Decimal,
    /// Default time budget from request to execution.
    pub time_limit: Duration,
    /// Refuse requests while the kill switch is triggered.
    pub require_kill_switch_off: bool,
    /// Fee charged on exit notional (fraction).
    pub fee_rate: Decimal,
    /// Results kept in memory; the oldest are evicted first.
    pub max_retained_results: usize,
}

impl Default for LiquidationConfig {
    fn default() -> Self {
        Self {
            queue_interval: Duration::from_secs(5),
            max_daily_liquidations: 10,
            max_slippage: Decimal::new(2, 2), // 2%
            time_limit: Duration::from_secs(60),
            require_kill_switch_off: true,
            fee_rate: Decimal::new(1, 3), // 0.1%
            max_retained_results: 10_000,
        }
    }
}

/// Liquidation service errors.
#[derive(Debug, thiserror::Error)]
pub enum LiquidationError {
    /// Malformed request; nothing was recorded.
    #[error("invalid liquidation request: {0}")]
    Validation(String),
    /// Refused by a risk limit; a `Rejected` result was recorded under `id`.
    #[error("liquidation {id} rejected: {reason}")]
    Rejected { id: String, reason: String },
    #[error("liquidation not found: {0}")]
    NotFound(String),
    #[error("liquidation {0} is no longer pending")]
    NotPending(String),
    #[error(transparent)]
    AlreadyRunning(#[from] AlreadyRunning),
}

/// An accepted request waiting for the queue.
#[derive(Debug, Clone)]
pub struct PendingLiquidation {
    pub id: String,
    pub request: LiquidationRequest,
    pub requested_at: DateTime<Utc>,
    pub warnings: Vec<String>,
    enqueued_at: Instant,
}

struct Book {
    queue: VecDeque<PendingLiquidation>,
    results: HashMap<String, LiquidationResult>,
    /// Result ids in insertion order, for eviction.
    retention: VecDeque<String>,
    daily: DailyLiquidationStats,
}

impl Book {
    fn store(&mut self, result: LiquidationResult, limit: usize) {
        if !self.results.contains_key(&result.id) {
            self.retention.push_back(result.id.clone());
        }
        self.results.insert(result.id.clone(), result);
        // queued or running results stay pollable until they finish
        while self.results.len() > limit.max(1) {
            let Some(index) = self.retention.iter().position(|id| {
                self.results
                    .get(id)
                    .is_none_or(|r| r.status.is_final())
            }) else {
                break;
            };
            if let Some(oldest) = self.retention.remove(index) {
                self.results.remove(&oldest);
            }
        }
    }

    fn daily_for(&mut self, today: NaiveDate) -> &mut DailyLiquidationStats {
        if self.daily.roll_over(today) {
            debug!(date = %today, "Daily liquidation stats reset");
        }
        &mut self.daily
    }
}

/// Source of the current UTC date for the daily limits.
pub type Calendar = Arc<dyn Fn() -> NaiveDate + Send + Sync>;

/// Accepts, queues and executes liquidation requests.
pub struct LiquidationService {
    book: RwLock<Book>,
    calendar: Calendar,
    tracker: Arc<PositionTracker>,
    executor: Arc<dyn OrderExecutor>,
    kill_switch: Arc<KillSwitch>,
    notifier: Option<Arc<dyn Notifier>>,
    config: LiquidationConfig,
    queue_loop: BackgroundLoop,
}

impl LiquidationService {
    pub fn new(
        tracker: Arc<PositionTracker>,
        executor: Arc<dyn OrderExecutor>,
        kill_switch: Arc<KillSwitch>,
        config: LiquidationConfig,
    ) -> Self {
        Self {
            book: RwLock::new(Book {
                queue: VecDeque::new(),
                results: HashMap::new(),
                retention: VecDeque::new(),
                daily: DailyLiquidationStats::new(Utc::now().date_naive()),
            }),
            calendar: Arc::new(|| Utc::now().date_naive()),
            tracker,
            executor,
            kill_switch,
            notifier: None,
            config,
            queue_loop: BackgroundLoop::new("liquidation-queue"),
        }
    }

    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Replaces the wall-clock date used to roll the daily counters.
    #[must_use]
    pub fn with_calendar(mut self, calendar: Calendar) -> Self {
        self.calendar = calendar;
        self
    }

    pub fn config(&self) -> &LiquidationConfig {
        &self.config
    }

    /// Validates a request, applies the risk limits and queues it.
    ///
    /// Returns the `Pending` result on acceptance. A risk-limit refusal is
    /// recorded as a `Rejected` result and returned as an error.
    ///
    /// # Errors
    /// `Validation` for malformed requests, `Rejected` for risk refusals.
    pub async fn request_liquidation(
        &self,
        mut request: LiquidationRequest,
    ) -> Result<LiquidationResult, LiquidationError> {
        self.validate_request(&mut request)?;

        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now();
        let kill_switch_status = self.kill_switch.get_state().await.status;

        let outcome = {
            let mut book = self.book.write().await;
            let daily = book.daily_for((self.calendar)());
            let mut result = LiquidationResult::pending(&id, &request, now);
            match self.validate_risk_limits(daily, &request, kill_switch_status) {
                Ok(warnings) => {
                    daily.count += 1;
                    result.warnings = warnings.clone();
                    book.queue.push_back(PendingLiquidation {
                        id: id.clone(),
                        request: request.clone(),
                        requested_at: now,
                        warnings,
                        enqueued_at: Instant::now(),
                    });
                    book.store(result.clone(), self.config.max_retained_results);
                    Ok(result)
                }
                Err(reason) => {
                    result.finish_with_error(LiquidationStatus::Rejected, reason.clone(), now);
                    book.store(result.clone(), self.config.max_retained_results);
                    Err((result, reason))
                }
            }
        };

        match outcome {
            Ok(result) => {
                info!(
                    id = %id,
                    target = %request.target(),
                    percentage = %request.percentage,
                    reason = ?request.reason,
                    by = %request.triggered_by,
                    "Liquidation accepted"
                );
                for warning in &result.warnings {
                    warn!(id = %id, warning = %warning, "Liquidation warning");
                }
                Ok(result)
            }
            Err((result, reason)) => {
                warn!(id = %id, target = %request.target(), reason = %reason, "Liquidation rejected");
                self.notify(&result);
                Err(LiquidationError::Rejected { id, reason })
            }
        }
    }

    /// Checks shape and fills defaults in place.
    ///
    /// # Errors
    /// Fails without side effects when the target is missing or the
    /// percentage is outside (0, 100].
    pub fn validate_request(&self, request: &mut LiquidationRequest) -> Result<(), LiquidationError> {
        let has_position = request
            .position_id
            .as_deref()
            .is_some_and(|id| !id.trim().is_empty());
        let has_symbol = request
            .symbol
            .as_deref()
            .is_some_and(|s| !s.trim().is_empty());
        if !has_position && !has_symbol {
            return Err(LiquidationError::Validation(
                "position_id or symbol is required".to_string(),
            ));
        }

        if request.percentage.is_zero() {
            request.percentage = Decimal::ONE_HUNDRED;
        }
        Percentage::of_position(request.percentage)
            .map_err(|e| LiquidationError::Validation(e.to_string()))?;

        match request.max_slippage {
            Some(s) if s < Decimal::ZERO => {
                return Err(LiquidationError::Validation(format!(
                    "max slippage must not be negative, got {s}"
                )));
            }
            Some(_) => {}
            None => request.max_slippage = Some(self.config.max_slippage),
        }
        if request.time_limit.is_none_or(|t| t.is_zero()) {
            request.time_limit = Some(self.config.time_limit);
        }
        Ok(())
    }

    /// Returns warnings on acceptance, the refusal reason otherwise.
    fn validate_risk_limits(
        &self,
        daily: &DailyLiquidationStats,
        request: &LiquidationRequest,
        kill_switch_status: KillSwitchStatus,
    ) -> Result<Vec<String>, String> {
        if self.config.require_kill_switch_off && kill_switch_status == KillSwitchStatus::Triggered {
            return Err("kill switch is triggered".to_string());
        }
        if daily.count >= self.config.max_daily_liquidations {
            return Err(format!(
                "daily liquidation limit reached ({}/{})",
                daily.count, self.config.max_daily_liquidations
            ));
        }

        let mut warnings = Vec::new();
        if request.reason == LiquidationReason::Manual {
            warnings.push(format!(
                "manual liquidation requested by {}",
                request.triggered_by
            ));
        }
        Ok(warnings)
    }

    /// Takes the oldest queued request and runs it to a final result.
    ///
    /// Returns `None` when the queue is empty.
    pub async fn process_next(&self) -> Option<LiquidationResult> {
        let pending = self.book.write().await.queue.pop_front()?;
        let time_limit = pending.request.time_limit.unwrap_or(self.config.time_limit);

        let mut result = LiquidationResult::pending(&pending.id, &pending.request, pending.requested_at);
        result.warnings = pending.warnings.clone();

        let result = if pending.enqueued_at.elapsed() > time_limit {
            result.finish_with_error(LiquidationStatus::Failed, "time limit exceeded", Utc::now());
            result
        } else {
            result.status = LiquidationStatus::Processing;
            result.started_at = Some(Utc::now());
            self.book
                .write()
                .await
                .store(result.clone(), self.config.max_retained_results);

            let remaining = time_limit.saturating_sub(pending.enqueued_at.elapsed());
            let in_flight = result.clone();
            match tokio::time::timeout(remaining, self.execute_liquidation(result, &pending.request)).await {
                Ok(done) => done,
                Err(_) => {
                    let mut timed_out = in_flight;
                    timed_out.finish_with_error(LiquidationStatus::Failed, "time limit exceeded", Utc::now());
                    timed_out
                }
            }
        };

        {
            let mut book = self.book.write().await;
            book.daily_for((self.calendar)()).record_pnl(result.net_pnl);
            book.store(result.clone(), self.config.max_retained_results);
        }

        match result.status {
            LiquidationStatus::Completed | LiquidationStatus::Partial => info!(
                id = %result.id,
                position_id = ?result.position_id,
                status = ?result.status,
                liquidated_size = %result.liquidated_size,
                exit_price = %result.exit_price,
                net_pnl = %result.net_pnl,
                "Liquidation complete"
            ),
            _ => error!(
                id = %result.id,
                position_id = ?result.position_id,
                status = ?result.status,
                error = ?result.error,
                "Liquidation did not execute"
            ),
        }
        self.notify(&result);
        Some(result)
    }

    /// Executes one accepted request against the current position state.
    pub async fn execute_liquidation(
        &self,
        mut result: LiquidationResult,
        request: &LiquidationRequest,
    ) -> LiquidationResult {
        let snapshot = match &request.position_id {
            Some(id) if !id.trim().is_empty() => self.tracker.snapshot(id).await,
            _ => match &request.symbol {
                Some(symbol) => self.tracker.find_open(request.exchange.as_deref(), symbol).await,
                None => None,
            },
        };
        let Some(snapshot) = snapshot else {
            result.finish_with_error(
                LiquidationStatus::Failed,
                format!("no open position for {}", request.target()),
                Utc::now(),
            );
            return result;
        };

        result.position_id = Some(snapshot.position_id.clone());
        result.symbol = Some(snapshot.symbol.clone());
        result.exchange = Some(snapshot.exchange.clone());
        result.side = Some(snapshot.side);
        result.original_size = snapshot.size;
        result.entry_price = snapshot.entry_price;
        if result.started_at.is_none() {
            result.started_at = Some(Utc::now());
        }

        let percentage = Percentage(request.percentage);
        let liquidated_size = percentage.apply(snapshot.size);
        result.percentage = request.percentage;
        result.liquidated_size = liquidated_size;
        result.remaining_size = snapshot.size - liquidated_size;

        let mark_price = if snapshot.mark_price > Decimal::ZERO {
            snapshot.mark_price
        } else {
            result
                .warnings
                .push("no mark price yet, using entry price".to_string());
            snapshot.entry_price
        };

        let slippage = slippage_pct(snapshot.entry_price, mark_price);
        result.slippage_pct = slippage;
        let max_slippage = request.max_slippage.unwrap_or(self.config.max_slippage);
        if slippage > max_slippage {
            let message = format!("slippage {slippage} exceeds max {max_slippage}");
            if request.require_confirmation {
                result.finish_with_error(LiquidationStatus::Rejected, message, Utc::now());
                return result;
            }
            result.warnings.push(message);
        }

        let order = MarketOrder {
            client_order_id: format!("liq-{}", result.id),
            exchange: snapshot.exchange.clone(),
            symbol: snapshot.symbol.clone(),
            side: snapshot.side.closing_order_side(),
            size: liquidated_size,
            reference_price: mark_price,
            reduce_only: true,
        };
        let exit_price = match self.executor.execute_order(&order).await {
            Ok(price) => price,
            Err(e) => {
                result.finish_with_error(LiquidationStatus::Failed, e.to_string(), Utc::now());
                return result;
            }
        };

        let gross = realized_pnl(snapshot.side, snapshot.entry_price, exit_price, liquidated_size);
        let pnl = PnLBreakdown::with_fee_rate(gross, exit_price * liquidated_size, self.config.fee_rate);
        result.exit_price = exit_price;
        result.gross_pnl = pnl.gross_pnl;
        result.fees = pnl.fees;
        result.net_pnl = pnl.net_pnl;
        result.status = if percentage.is_full() {
            LiquidationStatus::Completed
        } else {
            LiquidationStatus::Partial
        };
        result.completed_at = Some(Utc::now());

        let tracker_update = if percentage.is_full() {
            self.tracker
                .liquidate_position(&snapshot.position_id, Some(exit_price))
                .await
                .map(|_| ())
        } else {
            self.tracker
                .reduce_position(&snapshot.position_id, liquidated_size)
                .await
                .map(|_| ())
        };
        if let Err(e) = tracker_update {
            result
                .warnings
                .push(format!("position tracker not updated: {e}"));
        }

        result
    }

    pub async fn get_liquidation_result(&self, id: &str) -> Option<LiquidationResult> {
        self.book.read().await.results.get(id).cloned()
    }

    /// Today's counters.
    pub async fn get_daily_stats(&self) -> DailyLiquidationStats {
        *self.book.write().await.daily_for((self.calendar)())
    }

    /// Queued requests, oldest first.
    pub async fn pending_requests(&self) -> Vec<PendingLiquidation> {
        self.book.read().await.queue.iter().cloned().collect()
    }

    /// Withdraws a queued request. The daily slot is not released.
    ///
    /// # Errors
    /// `NotFound` for unknown ids, `NotPending` once processing has begun.
    pub async fn cancel_liquidation(&self, id: &str) -> Result<LiquidationResult, LiquidationError> {
        let result = {
            let mut book = self.book.write().await;
            let Some(index) = book.queue.iter().position(|p| p.id == id) else {
                return Err(if book.results.contains_key(id) {
                    LiquidationError::NotPending(id.to_string())
                } else {
                    LiquidationError::NotFound(id.to_string())
                });
            };
            let Some(pending) = book.queue.remove(index) else {
                return Err(LiquidationError::NotFound(id.to_string()));
            };
            let mut result = LiquidationResult::pending(&pending.id, &pending.request, pending.requested_at);
            result.warnings = pending.warnings;
            result.finish_with_error(LiquidationStatus::Rejected, "cancelled", Utc::now());
            book.store(result.clone(), self.config.max_retained_results);
            result
        };
        info!(id = %id, "Liquidation cancelled");
        Ok(result)
    }

    /// Starts the queue loop.
    ///
    /// # Errors
    /// Fails if the loop is already running.
    pub async fn start(self: &Arc<Self>) -> Result<(), LiquidationError> {
        let service = Arc::clone(self);
        self.queue_loop
            .start(self.config.queue_interval, move || {
                let service = Arc::clone(&service);
                async move {
                    service.process_next().await;
                }
            })
            .await?;
        Ok(())
    }

    pub async fn stop(&self) {
        self.queue_loop.stop().await;
    }

    pub async fn is_running(&self) -> bool {
        self.queue_loop.is_running().await
    }

    fn notify(&self, result: &LiquidationResult) {
        let Some(notifier) = self.notifier.clone() else {
            return;
        };
        let result = result.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.notify_liquidation(&result).await {
                warn!(id = %result.id, error = %e, "Liquidation notification failed");
            }
        });
    }
}
