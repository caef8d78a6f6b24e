use std::{
    fmt::Display,
    iter::Sum,
    ops::{Add, AddAssign, Neg, Sub, SubAssign},
    str::FromStr,
};

use rust_decimal::{prelude::ToPrimitive, Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::op;

/// The number of decimal places used when a network does not declare its own divisibility.
pub const DEFAULT_DIVISIBILITY: u32 = 8;

/// The largest scale a [`Decimal`] can carry.
pub const MAX_DIVISIBILITY: u32 = 28;

//--------------------------------------       Amount         ---------------------------------------------------------
/// A quantity of some crypto asset, expressed in whole coins (e.g. BTC, not satoshis).
///
/// Amounts are exact decimals. Rounding only ever happens explicitly, at the asset's divisibility, through
/// [`Amount::round_up`] and [`Amount::round_half_up`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Amount(Decimal);

op!(binary Amount, Add, add);
op!(binary Amount, Sub, sub);
op!(inplace Amount, AddAssign, add_assign);
op!(inplace Amount, SubAssign, sub_assign);
op!(unary Amount, Neg, neg);

impl Sum for Amount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Value cannot be represented as an amount: {0}")]
pub struct AmountConversionError(String);

impl From<Decimal> for Amount {
    fn from(value: Decimal) -> Self {
        Self(value)
    }
}

impl From<i64> for Amount {
    fn from(value: i64) -> Self {
        Self(Decimal::from(value))
    }
}

impl FromStr for Amount {
    type Err = AmountConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Decimal::from_str(s.trim()).map(Self).map_err(|e| AmountConversionError(format!("{s}: {e}")))
    }
}

impl Display for Amount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

impl Amount {
    pub const ZERO: Amount = Amount(Decimal::ZERO);

    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    /// The smallest representable unit at the given divisibility, e.g. one satoshi for divisibility 8.
    pub fn one_unit(divisibility: u32) -> Self {
        Self(Decimal::new(1, divisibility.min(MAX_DIVISIBILITY)))
    }

    /// Builds an amount from a count of base units (satoshis for Bitcoin).
    pub fn from_base_units(units: i64, divisibility: u32) -> Self {
        Self(Decimal::new(units, divisibility.min(MAX_DIVISIBILITY)))
    }

    /// The amount expressed in base units, truncated toward zero. Returns an error on overflow.
    pub fn to_base_units(&self, divisibility: u32) -> Result<i64, AmountConversionError> {
        let scaled = self
            .0
            .checked_mul(Decimal::from(10u64.pow(divisibility.min(19))))
            .ok_or_else(|| AmountConversionError(format!("{self} overflows at divisibility {divisibility}")))?;
        scaled.trunc().to_i64().ok_or_else(|| AmountConversionError(format!("{self} does not fit in base units")))
    }

    /// Ceiling at the given divisibility. Used for amounts *owed*, so that the customer is never asked for less than
    /// the true amount.
    pub fn round_up(&self, divisibility: u32) -> Self {
        Self(self.0.round_dp_with_strategy(divisibility.min(MAX_DIVISIBILITY), RoundingStrategy::ToPositiveInfinity))
    }

    /// Round-half-away-from-zero at the given divisibility.
    pub fn round_half_up(&self, divisibility: u32) -> Self {
        Self(self.0.round_dp_with_strategy(divisibility.min(MAX_DIVISIBILITY), RoundingStrategy::MidpointAwayFromZero))
    }

    /// Truncation toward zero at the given divisibility.
    pub fn truncate(&self, divisibility: u32) -> Self {
        Self(self.0.round_dp_with_strategy(divisibility.min(MAX_DIVISIBILITY), RoundingStrategy::ToZero))
    }

    /// Returns `self * factor`, or `None` on overflow.
    pub fn checked_mul(&self, factor: Decimal) -> Option<Self> {
        self.0.checked_mul(factor).map(Self)
    }

    /// Returns `self / divisor`, or `None` if the divisor is zero or the result overflows.
    pub fn checked_div(&self, divisor: Decimal) -> Option<Self> {
        self.0.checked_div(divisor).map(Self)
    }

    pub fn max(self, other: Self) -> Self {
        std::cmp::max(self, other)
    }
}

#[cfg(test)]
mod test {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn rounding_modes() {
        let a = Amount::new(dec!(0.123456781));
        assert_eq!(a.round_up(8), Amount::new(dec!(0.12345679)));
        assert_eq!(a.round_half_up(8), Amount::new(dec!(0.12345678)));
        assert_eq!(Amount::new(dec!(0.123456785)).round_half_up(8), Amount::new(dec!(0.12345679)));
        assert_eq!(a.truncate(2), Amount::new(dec!(0.12)));
        // exact values are never bumped up
        assert_eq!(Amount::new(dec!(1.5)).round_up(8), Amount::new(dec!(1.5)));
    }

    #[test]
    fn base_units() {
        assert_eq!(Amount::one_unit(8), Amount::new(dec!(0.00000001)));
        assert_eq!(Amount::from_base_units(150_000_000, 8), Amount::new(dec!(1.5)));
        assert_eq!(Amount::new(dec!(1.234567899)).to_base_units(8), Ok(123_456_789));
        assert_eq!(Amount::new(dec!(99)).to_base_units(0), Ok(99));
    }

    #[test]
    fn arithmetic_and_display() {
        let mut a = Amount::from(10) - Amount::from(4);
        a += Amount::new(dec!(0.5));
        assert_eq!(a.to_string(), "6.5");
        assert_eq!((-a).to_string(), "-6.5");
        let total: Amount = vec![Amount::from(1), Amount::from(2), Amount::from(3)].into_iter().sum();
        assert_eq!(total, Amount::from(6));
        assert_eq!("0.00010000".parse::<Amount>().map(|a| a.to_string()), Ok("0.0001".to_string()));
        assert!("ten".parse::<Amount>().is_err());
    }
}
