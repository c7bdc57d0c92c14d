//! # Pricing engine
//!
//! Turns a cart subtotal, a discount and a shipping cost into the rounded [`Breakdown`] that populates an order's
//! money fields. Everything in here is pure: no I/O, no clock, no state. Checkout and the admin "simulate" preview
//! call the same functions with the same [`PricingConfig`].
//!
//! Every intermediate value is rounded to cents with the configured [`RoundingMode`] before it is combined with
//! anything else, so fractional cents never accumulate.
mod calculator;

use std::{fmt::Display, str::FromStr};

pub use calculator::{compute_totals, line_subtotal, promo_discount, CartLine};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use spg_common::{Money, MoneyConversionError};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PricingError {
    #[error("Invalid amount. {0}")]
    InvalidAmount(String),
    #[error("The cart is empty")]
    EmptyCart,
    #[error("Amount could not be represented in cents. {0}")]
    Conversion(#[from] MoneyConversionError),
}

//--------------------------------------     RoundingMode      ---------------------------------------------------------
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundingMode {
    /// Ties round away from zero. 1.005 -> 1.01
    #[default]
    HalfUp,
    /// Banker's rounding. Ties round to the even neighbour. 1.005 -> 1.00
    HalfEven,
    /// Any fraction of a cent rounds away from zero.
    TruncateUp,
    /// Any fraction of a cent is dropped.
    TruncateDown,
}

impl RoundingMode {
    pub fn strategy(&self) -> RoundingStrategy {
        match self {
            Self::HalfUp => RoundingStrategy::MidpointAwayFromZero,
            Self::HalfEven => RoundingStrategy::MidpointNearestEven,
            Self::TruncateUp => RoundingStrategy::AwayFromZero,
            Self::TruncateDown => RoundingStrategy::ToZero,
        }
    }

    /// Rounds `value` to cents.
    pub fn round(&self, value: Decimal) -> Decimal {
        value.round_dp_with_strategy(2, self.strategy())
    }
}

impl Display for RoundingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::HalfUp => "half_up",
            Self::HalfEven => "half_even",
            Self::TruncateUp => "truncate_up",
            Self::TruncateDown => "truncate_down",
        };
        f.write_str(s)
    }
}

impl FromStr for RoundingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "half_up" => Ok(Self::HalfUp),
            "half_even" | "bankers" => Ok(Self::HalfEven),
            "truncate_up" => Ok(Self::TruncateUp),
            "truncate_down" => Ok(Self::TruncateDown),
            other => Err(format!("Unknown rounding mode: {other}")),
        }
    }
}

//--------------------------------------       FeeRule         ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "value")]
pub enum FeeKind {
    Flat(Decimal),
    /// Percent of the taxable subtotal, e.g. `2.5` for 2.5%.
    Percent(Decimal),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeRule {
    pub enabled: bool,
    pub kind: FeeKind,
}

impl FeeRule {
    pub fn disabled() -> Self {
        Self { enabled: false, kind: FeeKind::Flat(Decimal::ZERO) }
    }

    pub fn flat(amount: Decimal) -> Self {
        Self { enabled: true, kind: FeeKind::Flat(amount) }
    }

    pub fn percent(rate: Decimal) -> Self {
        Self { enabled: true, kind: FeeKind::Percent(rate) }
    }
}

impl Default for FeeRule {
    fn default() -> Self {
        Self::disabled()
    }
}

//--------------------------------------       TaxRule         ---------------------------------------------------------
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxRule {
    pub enabled: bool,
    /// VAT rate in percent, e.g. `19` for 19%.
    pub rate_percent: Decimal,
    pub apply_to_shipping: bool,
    pub apply_to_fee: bool,
}

impl TaxRule {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn vat(rate_percent: Decimal) -> Self {
        Self { enabled: true, rate_percent, apply_to_shipping: false, apply_to_fee: false }
    }

    pub fn on_shipping(mut self, apply: bool) -> Self {
        self.apply_to_shipping = apply;
        self
    }

    pub fn on_fee(mut self, apply: bool) -> Self {
        self.apply_to_fee = apply;
        self
    }
}

//--------------------------------------      Breakdown        ---------------------------------------------------------
/// The rounded result of a pricing run. Every field is a whole number of cents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Breakdown {
    pub subtotal: Money,
    pub discount: Money,
    pub taxable_subtotal: Money,
    pub shipping: Money,
    pub fee: Money,
    pub vat: Money,
    pub total: Money,
}

//--------------------------------------    PricingConfig      ---------------------------------------------------------
/// The fee, tax and rounding configuration shared by checkout and the simulate preview.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingConfig {
    pub fee: FeeRule,
    pub tax: TaxRule,
    pub rounding: RoundingMode,
}

impl PricingConfig {
    pub fn new(fee: FeeRule, tax: TaxRule, rounding: RoundingMode) -> Self {
        Self { fee, tax, rounding }
    }

    /// Runs the pricing engine without touching any order. Used by admin previews.
    pub fn simulate(&self, subtotal: Decimal, discount: Decimal, shipping: Decimal) -> Result<Breakdown, PricingError> {
        compute_totals(subtotal, discount, shipping, &self.fee, &self.tax, self.rounding)
    }
}
