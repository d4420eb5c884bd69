//! Kill-switch state and risk conditions.

use crate::enums::{KillSwitchStatus, KillSwitchTrigger};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// The process-wide trading-halt state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillSwitchState {
    pub status: KillSwitchStatus,
    pub trigger: Option<KillSwitchTrigger>,
    pub triggered_at: Option<DateTime<Utc>>,
    pub triggered_by: Option<String>,
    pub reason: Option<String>,
    /// Set only while `Triggered` with a non-zero cooldown.
    pub auto_recover_at: Option<DateTime<Utc>>,
    pub recovered_at: Option<DateTime<Utc>>,
    pub recovered_by: Option<String>,
}

impl Default for KillSwitchState {
    fn default() -> Self {
        Self {
            status: KillSwitchStatus::Active,
            trigger: None,
            triggered_at: None,
            triggered_by: None,
            reason: None,
            auto_recover_at: None,
            recovered_at: None,
            recovered_by: None,
        }
    }
}

impl KillSwitchState {
    pub fn is_trading_allowed(&self) -> bool {
        self.status == KillSwitchStatus::Active
    }

    /// Whether a triggered switch has passed its recovery deadline.
    pub fn auto_recovery_due(&self, now: DateTime<Utc>) -> bool {
        self.status == KillSwitchStatus::Triggered
            && self.auto_recover_at.is_some_and(|at| now > at)
    }
}

/// A named threshold over one published risk metric.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillSwitchCondition {
    pub id: String,
    pub name: String,
    pub trigger: KillSwitchTrigger,
    /// Metric key read from the metrics store.
    pub metric: String,
    pub threshold: Decimal,
    pub is_active: bool,
    pub last_checked: Option<DateTime<Utc>>,
}

impl KillSwitchCondition {
    pub fn new(
        trigger: KillSwitchTrigger,
        name: impl Into<String>,
        metric: impl Into<String>,
        threshold: Decimal,
        is_active: bool,
    ) -> Self {
        Self {
            id: trigger.as_str().to_string(),
            name: name.into(),
            trigger,
            metric: metric.into(),
            threshold,
            is_active,
            last_checked: None,
        }
    }

    pub fn is_breached(&self, value: Decimal) -> bool {
        value >= self.threshold
    }

    /// Drawdown 20%, daily loss 5%, 5 consecutive losses, volatility 10% (off).
    pub fn defaults() -> Vec<KillSwitchCondition> {
        vec![
            Self::new(
                KillSwitchTrigger::MaxDrawdown,
                "Maximum drawdown",
                "drawdown_pct",
                Decimal::new(20, 0),
                true,
            ),
            Self::new(
                KillSwitchTrigger::DailyLossCap,
                "Daily loss cap",
                "daily_loss_pct",
                Decimal::new(5, 0),
                true,
            ),
            Self::new(
                KillSwitchTrigger::ConsecutiveLosses,
                "Consecutive losses",
                "consecutive_losses",
                Decimal::new(5, 0),
                true,
            ),
            Self::new(
                KillSwitchTrigger::HighVolatility,
                "High volatility",
                "volatility_pct",
                Decimal::new(10, 0),
                false,
            ),
        ]
    }
}

/// One entry of the transition history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KillSwitchEvent {
    pub from: KillSwitchStatus,
    pub to: KillSwitchStatus,
    pub trigger: Option<KillSwitchTrigger>,
    pub by: String,
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}
