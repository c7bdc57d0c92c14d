use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use spg_common::Money;

use super::{Breakdown, FeeKind, FeeRule, PricingError, RoundingMode, TaxRule};
use crate::db_types::PromoDiscount;

/// A single cart line as supplied by checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub sku: String,
    pub unit_price: Decimal,
    pub quantity: u32,
}

impl CartLine {
    pub fn new<S: Into<String>>(sku: S, unit_price: Decimal, quantity: u32) -> Self {
        Self { sku: sku.into(), unit_price, quantity }
    }
}

fn non_negative(name: &str, value: Decimal) -> Result<Decimal, PricingError> {
    if value.is_sign_negative() && !value.is_zero() {
        return Err(PricingError::InvalidAmount(format!("{name} cannot be negative ({value})")));
    }
    Ok(value)
}

/// Computes the order totals.
///
/// * `taxable_subtotal = max(0, subtotal - discount)`
/// * `fee` is zero when disabled, the flat amount, or a percentage of the taxable subtotal
/// * `vat = rate% x (taxable_subtotal + shipping? + fee?)`, zero when disabled or the rate is not positive
/// * `total = max(0, taxable_subtotal + shipping + fee + vat)`
///
/// The inputs and every one of the values above are rounded to cents with `mode` as soon as they are produced.
pub fn compute_totals(
    subtotal: Decimal,
    discount: Decimal,
    shipping: Decimal,
    fee_rule: &FeeRule,
    tax_rule: &TaxRule,
    mode: RoundingMode,
) -> Result<Breakdown, PricingError> {
    let subtotal = mode.round(non_negative("subtotal", subtotal)?);
    let discount = mode.round(non_negative("discount", discount)?);
    let shipping = mode.round(non_negative("shipping", shipping)?);

    let taxable_subtotal = mode.round((subtotal - discount).max(Decimal::ZERO));

    let fee = match (fee_rule.enabled, fee_rule.kind) {
        (false, _) => Decimal::ZERO,
        (true, FeeKind::Flat(amount)) => mode.round(non_negative("fee", amount)?),
        (true, FeeKind::Percent(rate)) => {
            mode.round(taxable_subtotal * non_negative("fee rate", rate)? / Decimal::ONE_HUNDRED)
        },
    };

    let vat = if !tax_rule.enabled || tax_rule.rate_percent <= Decimal::ZERO {
        Decimal::ZERO
    } else {
        let mut base = taxable_subtotal;
        if tax_rule.apply_to_shipping {
            base += shipping;
        }
        if tax_rule.apply_to_fee {
            base += fee;
        }
        mode.round(base * tax_rule.rate_percent / Decimal::ONE_HUNDRED)
    };

    let total = mode.round((taxable_subtotal + shipping + fee + vat).max(Decimal::ZERO));

    Ok(Breakdown {
        subtotal: Money::from_decimal(subtotal)?,
        discount: Money::from_decimal(discount)?,
        taxable_subtotal: Money::from_decimal(taxable_subtotal)?,
        shipping: Money::from_decimal(shipping)?,
        fee: Money::from_decimal(fee)?,
        vat: Money::from_decimal(vat)?,
        total: Money::from_decimal(total)?,
    })
}

/// Sums the cart. Each line total is rounded before it is added.
pub fn line_subtotal(lines: &[CartLine], mode: RoundingMode) -> Result<Decimal, PricingError> {
    if lines.is_empty() {
        return Err(PricingError::EmptyCart);
    }
    lines.iter().try_fold(Decimal::ZERO, |acc, line| {
        if line.quantity == 0 {
            return Err(PricingError::InvalidAmount(format!("{} has a zero quantity", line.sku)));
        }
        let unit_price = non_negative(&line.sku, line.unit_price)?;
        Ok(acc + mode.round(unit_price * Decimal::from(line.quantity)))
    })
}

/// The discount a promo grants on `subtotal`. Never more than the subtotal itself.
pub fn promo_discount(discount: &PromoDiscount, subtotal: Decimal, mode: RoundingMode) -> Decimal {
    let amount = match discount {
        PromoDiscount::Percentage(pct) => mode.round(subtotal * *pct / Decimal::ONE_HUNDRED),
        PromoDiscount::Flat(amount) => amount.to_decimal(),
    };
    amount.min(subtotal).max(Decimal::ZERO)
}
