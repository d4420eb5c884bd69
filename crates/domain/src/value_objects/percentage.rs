use crate::error::DomainError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A percentage expressed on the 0..=100 scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Serialize, Deserialize)]
pub struct Percentage(pub Decimal);

impl Percentage {
    /// Validates a share of a position to unwind: must lie in (0, 100].
    pub fn of_position(value: Decimal) -> Result<Self, DomainError> {
        if value <= Decimal::ZERO || value > Decimal::ONE_HUNDRED {
            return Err(DomainError::InvalidPercentage);
        }
        Ok(Self(value))
    }

    /// Value on the 0..=1 scale.
    pub fn as_fraction(&self) -> Decimal {
        self.0 / Decimal::ONE_HUNDRED
    }

    pub fn is_full(&self) -> bool {
        self.0 == Decimal::ONE_HUNDRED
    }

    /// Applies the percentage to `amount`.
    pub fn apply(&self, amount: Decimal) -> Decimal {
        amount * self.as_fraction()
    }
}
