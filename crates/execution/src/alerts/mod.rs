//! Risk-event notifications.
//!
//! Delivery channels live outside the control plane; components only see
//! the `Notifier` trait and always call it fire-and-forget, after the state
//! transition has been committed and outside any lock.

use crate::stop_loss::ExecutionResult;
use async_trait::async_trait;
use sentinel_domain::entities::{KillSwitchState, LiquidationResult};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Notification delivery failure.
#[derive(Debug, Clone, thiserror::Error)]
#[error("notification failed: {0}")]
pub struct NotifyError(pub String);

/// Receiver of risk events.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_kill_switch_triggered(&self, state: &KillSwitchState) -> Result<(), NotifyError>;

    async fn notify_kill_switch_recovered(&self, state: &KillSwitchState) -> Result<(), NotifyError>;

    async fn notify_stop_loss_executed(&self, _result: &ExecutionResult) -> Result<(), NotifyError> {
        Ok(())
    }

    async fn notify_liquidation(&self, _result: &LiquidationResult) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Writes every event to the log.
#[derive(Debug, Default, Clone)]
pub struct ConsoleNotifier;

#[async_trait]
impl Notifier for ConsoleNotifier {
    async fn notify_kill_switch_triggered(&self, state: &KillSwitchState) -> Result<(), NotifyError> {
        error!(
            trigger = ?state.trigger,
            by = ?state.triggered_by,
            reason = ?state.reason,
            auto_recover_at = ?state.auto_recover_at,
            "KILL SWITCH TRIGGERED - trading halted"
        );
        Ok(())
    }

    async fn notify_kill_switch_recovered(&self, state: &KillSwitchState) -> Result<(), NotifyError> {
        info!(by = ?state.recovered_by, "Kill switch recovered - trading resumed");
        Ok(())
    }

    async fn notify_stop_loss_executed(&self, result: &ExecutionResult) -> Result<(), NotifyError> {
        if result.success {
            warn!(
                order_id = %result.order_id,
                symbol = %result.symbol,
                trigger_price = %result.trigger_price,
                execution_price = ?result.execution_price,
                realized_pnl = ?result.realized_pnl,
                "Stop-loss executed"
            );
        } else {
            error!(
                order_id = %result.order_id,
                symbol = %result.symbol,
                error = ?result.error,
                "Stop-loss execution failed"
            );
        }
        Ok(())
    }

    async fn notify_liquidation(&self, result: &LiquidationResult) -> Result<(), NotifyError> {
        warn!(
            id = %result.id,
            position_id = ?result.position_id,
            status = ?result.status,
            net_pnl = %result.net_pnl,
            "Liquidation finished"
        );
        Ok(())
    }
}

/// Fans every event out to several notifiers.
///
/// All notifiers are called even if one fails; the first error is returned.
#[derive(Default, Clone)]
pub struct MultiNotifier {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl MultiNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifiers.push(notifier);
        self
    }

    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }
}

fn first_error(results: Vec<Result<(), NotifyError>>) -> Result<(), NotifyError> {
    results.into_iter().find(Result::is_err).unwrap_or(Ok(()))
}

#[async_trait]
impl Notifier for MultiNotifier {
    async fn notify_kill_switch_triggered(&self, state: &KillSwitchState) -> Result<(), NotifyError> {
        let mut results = Vec::with_capacity(self.notifiers.len());
        for n in &self.notifiers {
            results.push(n.notify_kill_switch_triggered(state).await);
        }
        first_error(results)
    }

    async fn notify_kill_switch_recovered(&self, state: &KillSwitchState) -> Result<(), NotifyError> {
        let mut results = Vec::with_capacity(self.notifiers.len());
        for n in &self.notifiers {
            results.push(n.notify_kill_switch_recovered(state).await);
        }
        first_error(results)
    }

    async fn notify_stop_loss_executed(&self, result: &ExecutionResult) -> Result<(), NotifyError> {
        let mut results = Vec::with_capacity(self.notifiers.len());
        for n in &self.notifiers {
            results.push(n.notify_stop_loss_executed(result).await);
        }
        first_error(results)
    }

    async fn notify_liquidation(&self, result: &LiquidationResult) -> Result<(), NotifyError> {
        let mut results = Vec::with_capacity(self.notifiers.len());
        for n in &self.notifiers {
            results.push(n.notify_liquidation(result).await);
        }
        first_error(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct Counting {
        calls: AtomicU32,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for Counting {
        async fn notify_kill_switch_triggered(&self, _: &KillSwitchState) -> Result<(), NotifyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(NotifyError("webhook down".to_string()))
            } else {
                Ok(())
            }
        }

        async fn notify_kill_switch_recovered(&self, _: &KillSwitchState) -> Result<(), NotifyError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_multi_notifier_calls_everyone() {
        let failing = Arc::new(Counting {
            fail: true,
            ..Default::default()
        });
        let ok = Arc::new(Counting::default());
        let multi = MultiNotifier::new()
            .with(failing.clone())
            .with(ok.clone())
            .with(Arc::new(ConsoleNotifier));
        assert_eq!(multi.len(), 3);

        let result = multi
            .notify_kill_switch_triggered(&KillSwitchState::default())
            .await;
        assert!(result.is_err());
        assert_eq!(failing.calls.load(Ordering::SeqCst), 1);
        assert_eq!(ok.calls.load(Ordering::SeqCst), 1);
    }
}
