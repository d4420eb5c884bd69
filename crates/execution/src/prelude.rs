//! Prelude module for convenient imports.
//!
//! This module re-exports the most commonly used types from the crate.
//!
//! # Example
//!
//! ```rust
//! use sentinel_execution::prelude::*;
//! ```

// Alerts
pub use crate::alerts::{ConsoleNotifier, MultiNotifier, Notifier, NotifyError};

// Emergency
pub use crate::emergency::{
    Calendar, KillSwitch, KillSwitchConfig, KillSwitchError, LiquidationConfig, LiquidationError,
    LiquidationService, PendingLiquidation,
};

// Gateway
pub use crate::gateway::{
    GatewayError, ImbalanceDirection, ImbalanceProvider, MarketOrder, OrderBookImbalance,
    OrderExecutor, PriceFeed, SimulatedExecutor, StaticPriceFeed,
};

// Monitor
pub use crate::monitor::{
    PositionCallback, PositionTracker, SyncReport, TrackerConfig, TrackerError, TrackerStats,
};

// Scheduler
pub use crate::scheduler::{AlreadyRunning, BackgroundLoop};

// Stop-loss
pub use crate::stop_loss::{
    AutoExecutor, AutoExecutorConfig, EvaluationPass, ExecutionResult, ExecutionStats, StopLossConfig,
    StopLossEngine, StopLossError, StopLossParams,
};
