//! Periodic stop-loss evaluation.

use super::{ExecutionResult, StopLossEngine, StopLossError};
use crate::alerts::Notifier;
use crate::scheduler::BackgroundLoop;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// Configuration for the auto-execution driver.
#[derive(Debug, Clone)]
pub struct AutoExecutorConfig {
    /// Time between evaluation passes.
    pub evaluation_interval: Duration,
    /// Time budget for one pass.
    pub evaluation_timeout: Duration,
    /// Whether to send a notification per execution result.
    pub notify_executions: bool,
}

impl Default for AutoExecutorConfig {
    fn default() -> Self {
        Self {
            evaluation_interval: Duration::from_secs(1),
            evaluation_timeout: Duration::from_secs(30),
            notify_executions: true,
        }
    }
}

/// Counters accumulated across evaluation passes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub total_checks: u64,
    pub triggers: u64,
    pub successful: u64,
    pub failed: u64,
    pub timeouts: u64,
    pub last_check_at: Option<DateTime<Utc>>,
    pub last_trigger_at: Option<DateTime<Utc>>,
    pub last_trigger_order_id: Option<String>,
    pub last_trigger_symbol: Option<String>,
}

/// Drives `StopLossEngine::evaluate` on a fixed interval.
pub struct AutoExecutor {
    engine: Arc<StopLossEngine>,
    notifier: Option<Arc<dyn Notifier>>,
    config: AutoExecutorConfig,
    stats: RwLock<ExecutionStats>,
    driver: BackgroundLoop,
}

impl AutoExecutor {
    pub fn new(engine: Arc<StopLossEngine>, config: AutoExecutorConfig) -> Self {
        Self {
            engine,
            notifier: None,
            config,
            stats: RwLock::new(ExecutionStats::default()),
            driver: BackgroundLoop::new("stop-loss-executor"),
        }
    }

    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn engine(&self) -> &Arc<StopLossEngine> {
        &self.engine
    }

    /// Starts the evaluation loop.
    ///
    /// # Errors
    /// Returns an error if the loop is already running.
    pub async fn start(self: &Arc<Self>) -> Result<(), StopLossError> {
        let executor = Arc::clone(self);
        self.driver
            .start(self.config.evaluation_interval, move || {
                let executor = Arc::clone(&executor);
                async move {
                    if let Err(e) = executor.run_cycle().await {
                        error!(error = %e, "Stop-loss evaluation failed");
                    }
                }
            })
            .await?;
        info!(
            interval_ms = self.config.evaluation_interval.as_millis() as u64,
            "Stop-loss auto-execution started"
        );
        Ok(())
    }

    /// Stops the evaluation loop and waits for it to exit.
    pub async fn stop(&self) {
        if self.driver.stop().await {
            info!("Stop-loss auto-execution stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.driver.is_running().await
    }

    pub async fn get_stats(&self) -> ExecutionStats {
        self.stats.read().await.clone()
    }

    /// Runs one evaluation pass immediately, outside the loop.
    ///
    /// # Errors
    /// Returns `Timeout` if the pass exceeds the evaluation budget. Executions
    /// finished before the deadline are still counted and notified.
    pub async fn manually_trigger(&self) -> Result<Vec<ExecutionResult>, StopLossError> {
        self.run_cycle().await
    }

    async fn run_cycle(&self) -> Result<Vec<ExecutionResult>, StopLossError> {
        let deadline = tokio::time::Instant::now() + self.config.evaluation_timeout;
        let pass = self.engine.evaluate_before(deadline).await;
        let results = pass.results;

        {
            let mut stats = self.stats.write().await;
            stats.total_checks += 1;
            stats.last_check_at = Some(Utc::now());
            if pass.timed_out {
                stats.timeouts += 1;
            }
            for result in &results {
                stats.triggers += 1;
                if result.success {
                    stats.successful += 1;
                } else {
                    stats.failed += 1;
                }
                stats.last_trigger_at = Some(result.executed_at);
                stats.last_trigger_order_id = Some(result.order_id.clone());
                stats.last_trigger_symbol = Some(result.symbol.clone());
            }
        }

        if self.config.notify_executions
            && let Some(notifier) = &self.notifier
        {
            for result in &results {
                let notifier = Arc::clone(notifier);
                let result = result.clone();
                tokio::spawn(async move {
                    if let Err(e) = notifier.notify_stop_loss_executed(&result).await {
                        warn!(order_id = %result.order_id, error = %e, "Stop-loss notification failed");
                    }
                });
            }
        }

        if pass.timed_out {
            return Err(StopLossError::Timeout(self.config.evaluation_timeout));
        }
        Ok(results)
    }
}
