//! At-most-once accounting of promo code usage.
//!
//! Payment confirmations can arrive any number of times, concurrently, for the same order. The `promo_counted` order
//! event is the marker that a use has already been counted. It is checked and written in the same transaction as the
//! counter increment, while the caller holds the order row lock, and a partial unique index backs it up.
use chrono::{DateTime, Utc};
use log::*;
use rust_decimal::Decimal;
use serde_json::json;

use super::errors::OrderFlowError;
use crate::{
    db_types::{NewOrderEvent, Order, OrderEventKind, PromoCode, PromoDiscount},
    traits::{StoreError, StoreTransaction},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromoUsage {
    /// The order was placed without a promo code.
    NoPromo,
    /// This order's use had already been counted.
    AlreadyCounted,
    Counted(PromoCode),
    /// The code on the order no longer exists. Nothing is counted.
    UnknownCode(String),
}

/// Counts the order's promo code use, unless it has been counted before.
///
/// The caller must hold the order row lock (via [`StoreTransaction::lock_order`]) on the same transaction.
pub async fn record_promo_usage<T: StoreTransaction>(
    tx: &mut T,
    order: &Order,
    at: DateTime<Utc>,
) -> Result<PromoUsage, StoreError> {
    let Some(code) = order.promo_code.as_deref() else {
        return Ok(PromoUsage::NoPromo);
    };
    if tx.order_event_exists(&order.id, OrderEventKind::PromoCounted).await? {
        debug!("🔄️🎟️ Promo {code} has already been counted for order {}", order.id);
        return Ok(PromoUsage::AlreadyCounted);
    }
    if tx.lock_promo_code(code).await?.is_none() {
        warn!("🔄️🎟️ Order {} refers to promo code {code}, which does not exist. Usage not counted.", order.id);
        return Ok(PromoUsage::UnknownCode(code.to_string()));
    }
    let promo = tx.increment_promo_usage(code).await?;
    let payload = json!({ "code": code, "times_used": promo.times_used });
    tx.insert_order_event(&NewOrderEvent::new(order.id.clone(), OrderEventKind::PromoCounted, payload), at).await?;
    debug!("🔄️🎟️ Promo {code} counted for order {}. It has now been used {} times.", order.id, promo.times_used);
    Ok(PromoUsage::Counted(promo))
}

/// Checkout-time checks on a promo code. Returns the discount it grants.
pub fn validate_promo_code(promo: &PromoCode, currency: &str, now: DateTime<Utc>) -> Result<PromoDiscount, OrderFlowError> {
    let reject = |reason: &str| OrderFlowError::InvalidPromoCode { code: promo.code.clone(), reason: reason.to_string() };
    if !promo.active {
        return Err(reject("The code is not active"));
    }
    if promo.is_expired(now) {
        return Err(reject("The code has expired"));
    }
    if promo.is_exhausted() {
        return Err(reject("The code has reached its maximum number of uses"));
    }
    if !promo.currency.eq_ignore_ascii_case(currency) {
        return Err(reject(&format!("The code is only valid for {} orders", promo.currency)));
    }
    let discount = promo.discount().map_err(|e| reject(&e.to_string()))?;
    match discount {
        PromoDiscount::Percentage(pct) if pct <= Decimal::ZERO || pct > Decimal::ONE_HUNDRED => {
            Err(reject("The percentage must be between 0 and 100"))
        },
        PromoDiscount::Flat(amount) if amount.cents() <= 0 => Err(reject("The discount must be positive")),
        discount => Ok(discount),
    }
}

#[cfg(test)]
mod test {
    use chrono::Duration;
    use spg_common::Money;

    use super::*;
    use crate::db_types::PromoDiscountType;

    fn promo() -> PromoCode {
        PromoCode {
            code: "SPRING10".into(),
            discount_type: PromoDiscountType::Percentage,
            discount_value: "10".into(),
            currency: "RON".into(),
            expires_at: None,
            max_uses: Some(2),
            times_used: 0,
            active: true,
        }
    }

    #[test]
    fn valid_promo() {
        let d = validate_promo_code(&promo(), "ron", Utc::now()).unwrap();
        assert_eq!(d, PromoDiscount::Percentage(Decimal::TEN));
        let flat = PromoCode {
            discount_type: PromoDiscountType::Flat,
            discount_value: "15.00".into(),
            ..promo()
        };
        assert_eq!(validate_promo_code(&flat, "RON", Utc::now()).unwrap(), PromoDiscount::Flat(Money::from_cents(1500)));
    }

    #[test]
    fn rejected_promos() {
        let now = Utc::now();
        let cases = [
            PromoCode { active: false, ..promo() },
            PromoCode { expires_at: Some(now - Duration::minutes(1)), ..promo() },
            PromoCode { times_used: 2, ..promo() },
            PromoCode { currency: "EUR".into(), ..promo() },
            PromoCode { discount_value: "150".into(), ..promo() },
            PromoCode { discount_value: "ten".into(), ..promo() },
        ];
        for case in cases {
            let err = validate_promo_code(&case, "RON", now).unwrap_err();
            assert!(matches!(err, OrderFlowError::InvalidPromoCode { .. }), "{err}");
        }
    }
}
