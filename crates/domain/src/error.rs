use crate::enums::StopLossStatus;

/// Errors raised by domain invariants.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    /// Side string is neither long nor short.
    #[error("invalid side: {0} (expected long or short)")]
    InvalidSide(String),
    /// Illegal stop-loss state transition.
    #[error("invalid stop-loss transition from {from} to {to}")]
    InvalidTransition {
        /// Current status.
        from: StopLossStatus,
        /// Requested status.
        to: StopLossStatus,
    },
    /// Liquidation percentage outside (0, 100].
    #[error("percentage must be between 0 and 100")]
    InvalidPercentage,
}
