pub mod kill_switch;
pub mod liquidation;
pub mod position;
pub mod stop_loss;

// Re-export for easier access
pub use kill_switch::{KillSwitchCondition, KillSwitchEvent, KillSwitchState};
pub use liquidation::{DailyLiquidationStats, LiquidationRequest, LiquidationResult};
pub use position::{Fill, Position, PositionSnapshot, TrackedPosition};
pub use stop_loss::{NewStopLoss, StopLossOrder};
