use std::{
    fmt::Display,
    iter::Sum,
    ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign},
    str::FromStr,
};

use rust_decimal::{prelude::ToPrimitive, Decimal};
use serde::{Deserialize, Serialize};
use sqlx::Type;
use thiserror::Error;

use crate::op;

/// Number of fraction digits carried by every monetary amount.
pub const MONEY_SCALE: u32 = 2;

//--------------------------------------       Money         ---------------------------------------------------------
/// A single-currency monetary amount, stored as an integer number of cents.
///
/// All arithmetic on `Money` is exact. Fractional amounts (percentages, tax rates) are computed with [`Decimal`] and
/// rounded back to cents by the pricing engine before they become `Money` again.
///
/// `Money` serializes as a decimal string (`"130.90"`) so that JSON payloads never pass through a float.
#[derive(Debug, Clone, Copy, Default, Type, Ord, PartialOrd, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[sqlx(transparent)]
#[serde(try_from = "String", into = "String")]
pub struct Money(i64);

op!(binary Money, Add, add);
op!(binary Money, Sub, sub);
op!(inplace Money, AddAssign, add_assign);
op!(inplace Money, SubAssign, sub_assign);
op!(unary Money, Neg, neg);

impl Mul<i64> for Money {
    type Output = Self;

    fn mul(self, rhs: i64) -> Self::Output {
        Self(self.0 * rhs)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Value cannot be represented as a cent amount: {0}")]
pub struct MoneyConversionError(String);

impl From<i64> for Money {
    fn from(cents: i64) -> Self {
        Self(cents)
    }
}

impl Money {
    pub const ZERO: Money = Money(0);

    pub fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    pub fn cents(&self) -> i64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Converts a decimal amount into cents. The value must already be rounded to at most two fraction digits; any
    /// sub-cent remainder is an error rather than being silently rounded here.
    pub fn from_decimal(value: Decimal) -> Result<Self, MoneyConversionError> {
        let cents = value
            .checked_mul(Decimal::ONE_HUNDRED)
            .ok_or_else(|| MoneyConversionError(format!("{value} overflows")))?;
        if !cents.fract().is_zero() {
            return Err(MoneyConversionError(format!("{value} has more than {MONEY_SCALE} fraction digits")));
        }
        cents.trunc().to_i64().map(Self).ok_or_else(|| MoneyConversionError(format!("{value} is out of range")))
    }

    pub fn to_decimal(&self) -> Decimal {
        Decimal::new(self.0, MONEY_SCALE)
    }
}

impl Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_decimal())
    }
}

impl FromStr for Money {
    type Err = MoneyConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = Decimal::from_str(s.trim()).map_err(|e| MoneyConversionError(format!("{s}: {e}")))?;
        Self::from_decimal(value)
    }
}

impl TryFrom<String> for Money {
    type Error = MoneyConversionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Money> for String {
    fn from(value: Money) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod test {
    use rust_decimal::Decimal;

    use super::*;

    #[test]
    fn display_keeps_two_digits() {
        assert_eq!(Money::from_cents(13090).to_string(), "130.90");
        assert_eq!(Money::from_cents(5).to_string(), "0.05");
        assert_eq!(Money::from_cents(-250).to_string(), "-2.50");
        assert_eq!(Money::ZERO.to_string(), "0.00");
    }

    #[test]
    fn parse_and_convert() {
        assert_eq!("130.9".parse::<Money>().unwrap(), Money::from_cents(13090));
        assert_eq!("20".parse::<Money>().unwrap(), Money::from_cents(2000));
        assert!("1.005".parse::<Money>().is_err());
        assert!("ten".parse::<Money>().is_err());
        let d = Decimal::new(2090, 2);
        assert_eq!(Money::from_decimal(d).unwrap().to_decimal(), d);
    }

    #[test]
    fn arithmetic() {
        let mut total = Money::from_cents(9000) + Money::from_cents(2000);
        total += Money::from_cents(2090);
        assert_eq!(total, Money::from_cents(13090));
        total -= Money::from_cents(90);
        assert_eq!(total * 2, Money::from_cents(26000));
        let sum: Money = vec![Money::from_cents(1), Money::from_cents(2)].into_iter().sum();
        assert_eq!(sum, Money::from_cents(3));
    }

    #[test]
    fn json_is_a_string() {
        let json = serde_json::to_string(&Money::from_cents(13090)).unwrap();
        assert_eq!(json, "\"130.90\"");
        let back: Money = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Money::from_cents(13090));
    }
}
