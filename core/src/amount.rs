use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::COIN_VALUE;
use crate::error::BalanceError;

/// A non-negative amount in the engine's native asset, fixed-point with
/// [`crate::config::COIN_DECIMALS`] decimals. Stored as a plain `u64` so
/// ledger arithmetic is exact and `checked_add`/`checked_sub` give us
/// overflow/underflow detection for free, matching how the chain itself
/// represents balances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct Amount(u64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub fn from_raw(raw: u64) -> Self {
        Amount(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn checked_add(self, other: Amount) -> Result<Amount, BalanceError> {
        self.0
            .checked_add(other.0)
            .map(Amount)
            .ok_or(BalanceError::Overflow)
    }

    pub fn checked_sub(self, other: Amount) -> Result<Amount, BalanceError> {
        self.0.checked_sub(other.0).map(Amount).ok_or(BalanceError::Insufficient {
            need: other.0,
            have: self.0,
        })
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Whole-and-fractional display, e.g. `1.50000000`.
    pub fn to_decimal_string(self) -> String {
        let whole = self.0 / COIN_VALUE;
        let frac = self.0 % COIN_VALUE;
        format!("{whole}.{frac:08}")
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_decimal_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checked_add_overflows() {
        let a = Amount::from_raw(u64::MAX);
        let b = Amount::from_raw(1);
        assert!(matches!(a.checked_add(b), Err(BalanceError::Overflow)));
    }

    #[test]
    fn checked_sub_insufficient() {
        let a = Amount::from_raw(10);
        let b = Amount::from_raw(20);
        match a.checked_sub(b) {
            Err(BalanceError::Insufficient { need, have }) => {
                assert_eq!(need, 20);
                assert_eq!(have, 10);
            }
            _ => panic!("expected Insufficient error"),
        }
    }

    #[test]
    fn decimal_string_formats_fixed_point() {
        let a = Amount::from_raw(150_000_000);
        assert_eq!(a.to_decimal_string(), "1.50000000");
    }
}
