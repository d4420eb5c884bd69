use crate::error::DomainError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Direction of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "long",
            Side::Short => "short",
        }
    }

    /// Order side that reduces a position of this direction.
    pub fn closing_order_side(&self) -> OrderSide {
        match self {
            Side::Long => OrderSide::Sell,
            Side::Short => OrderSide::Buy,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "long" | "buy" => Ok(Side::Long),
            "short" | "sell" => Ok(Side::Short),
            other => Err(DomainError::InvalidSide(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Open,
    Closed,
    Liquidated,
}

impl PositionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PositionStatus::Open)
    }
}

/// Lifecycle of a stop-loss order.
///
/// `Active -> Triggered -> Executed`, with `Cancelled` and `Expired` as the
/// alternate terminal states reachable from `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopLossStatus {
    Active,
    Triggered,
    Executed,
    Cancelled,
    Expired,
}

impl StopLossStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StopLossStatus::Executed | StopLossStatus::Cancelled | StopLossStatus::Expired
        )
    }
}

impl fmt::Display for StopLossStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StopLossStatus::Active => "active",
            StopLossStatus::Triggered => "triggered",
            StopLossStatus::Executed => "executed",
            StopLossStatus::Cancelled => "cancelled",
            StopLossStatus::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// Global trading-halt state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KillSwitchStatus {
    /// Trading allowed.
    Active,
    /// Halted by a risk condition or operator trigger.
    Triggered,
    /// Halted manually, no auto-recovery.
    Paused,
}

impl fmt::Display for KillSwitchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            KillSwitchStatus::Active => "active",
            KillSwitchStatus::Triggered => "triggered",
            KillSwitchStatus::Paused => "paused",
        };
        f.write_str(s)
    }
}

/// What caused the kill switch to fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KillSwitchTrigger {
    Manual,
    MaxDrawdown,
    DailyLossCap,
    ConsecutiveLosses,
    HighVolatility,
}

impl KillSwitchTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            KillSwitchTrigger::Manual => "manual",
            KillSwitchTrigger::MaxDrawdown => "max_drawdown",
            KillSwitchTrigger::DailyLossCap => "daily_loss_cap",
            KillSwitchTrigger::ConsecutiveLosses => "consecutive_losses",
            KillSwitchTrigger::HighVolatility => "high_volatility",
        }
    }
}

impl fmt::Display for KillSwitchTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LiquidationStatus {
    Pending,
    Processing,
    Completed,
    Partial,
    Rejected,
    Failed,
}

impl LiquidationStatus {
    pub fn is_final(&self) -> bool {
        !matches!(
            self,
            LiquidationStatus::Pending | LiquidationStatus::Processing
        )
    }
}

/// Why a liquidation was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiquidationReason {
    /// Operator-initiated unwind.
    Manual,
    /// Emergency unwind (e.g. exchange incident).
    Emergency,
    /// Risk limit breached.
    RiskLimit,
    /// Follow-up to a kill-switch trigger.
    KillSwitch,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_side_parsing() {
        assert_eq!("long".parse::<Side>().unwrap(), Side::Long);
        assert_eq!(" SHORT ".parse::<Side>().unwrap(), Side::Short);
        assert!(matches!(
            "sideways".parse::<Side>(),
            Err(DomainError::InvalidSide(_))
        ));
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!StopLossStatus::Active.is_terminal());
        assert!(!StopLossStatus::Triggered.is_terminal());
        assert!(StopLossStatus::Expired.is_terminal());
        assert!(PositionStatus::Liquidated.is_terminal());
        assert!(!LiquidationStatus::Processing.is_final());
        assert!(LiquidationStatus::Partial.is_final());
    }

    #[test]
    fn test_closing_order_side() {
        assert_eq!(Side::Long.closing_order_side(), OrderSide::Sell);
        assert_eq!(Side::Short.closing_order_side(), OrderSide::Buy);
    }
}
