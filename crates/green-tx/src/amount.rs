//! Minor-unit amounts with checked arithmetic

use crate::{Error, Result};
use std::fmt;
use std::iter::Sum;

/// Integer amount in minor units (satoshi).
///
/// Arithmetic is explicit: `checked_*` returns an error on overflow or
/// underflow, `saturating_*` clamps. There is no wrapping operator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(u64);

impl Amount {
    /// Zero
    pub const ZERO: Amount = Amount(0);

    /// Create from satoshi
    pub const fn from_sat(sat: u64) -> Self {
        Self(sat)
    }

    /// Value in satoshi
    pub const fn to_sat(self) -> u64 {
        self.0
    }

    /// True if zero
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Add, failing on overflow
    pub fn checked_add(self, other: Amount) -> Result<Amount> {
        self.0
            .checked_add(other.0)
            .map(Amount)
            .ok_or_else(|| Error::AmountOverflow(format!("{} + {}", self.0, other.0)))
    }

    /// Subtract, failing on underflow
    pub fn checked_sub(self, other: Amount) -> Result<Amount> {
        self.0
            .checked_sub(other.0)
            .map(Amount)
            .ok_or_else(|| Error::AmountOverflow(format!("{} - {}", self.0, other.0)))
    }

    /// Add, clamping at the maximum
    pub fn saturating_add(self, other: Amount) -> Amount {
        Amount(self.0.saturating_add(other.0))
    }

    /// Subtract, clamping at zero
    pub fn saturating_sub(self, other: Amount) -> Amount {
        Amount(self.0.saturating_sub(other.0))
    }
}

impl From<u64> for Amount {
    fn from(sat: u64) -> Self {
        Amount(sat)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} sat", self.0)
    }
}

impl<'a> Sum<&'a Amount> for Amount {
    /// Saturating sum; totals over real UTXO sets never approach u64::MAX
    fn sum<I: Iterator<Item = &'a Amount>>(iter: I) -> Amount {
        iter.fold(Amount::ZERO, |acc, a| acc.saturating_add(*a))
    }
}
