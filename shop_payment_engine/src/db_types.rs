use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
pub use spg_common::Money;
use sqlx::{FromRow, Type};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Conversion error: {0}")]
pub struct ConversionError(pub String);

/// Generates the string conversions for the closed enums that are persisted as TEXT columns.
macro_rules! string_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s,)+
                }
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ConversionError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant),)+
                    s => Err(ConversionError(format!("Invalid {}: {s}", stringify!($name)))),
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = ConversionError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }
    };
}

//--------------------------------------        OrderId        ---------------------------------------------------------
/// Opaque, immutable order identity. Newly created orders receive a random UUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct OrderId(pub String);

impl OrderId {
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for OrderId {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl From<String> for OrderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for OrderId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

//--------------------------------------   OrderStatusType     ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatusType {
    /// An online payment has been initiated but not yet confirmed by the provider.
    PendingPayment,
    /// Payment was confirmed (or is not required, as for cash on delivery). Awaiting manual acceptance.
    PendingAcceptance,
    /// The merchant accepted the order.
    Paid,
    Shipped,
    Delivered,
    /// Terminal.
    Cancelled,
    /// Terminal.
    Refunded,
}

string_enum!(OrderStatusType {
    PendingPayment => "pending_payment",
    PendingAcceptance => "pending_acceptance",
    Paid => "paid",
    Shipped => "shipped",
    Delivered => "delivered",
    Cancelled => "cancelled",
    Refunded => "refunded",
});

impl OrderStatusType {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Refunded)
    }
}

//--------------------------------------    PaymentMethod      ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Stripe,
    #[serde(rename = "paypal")]
    PayPal,
    Netopia,
    CashOnDelivery,
}

string_enum!(PaymentMethod {
    Stripe => "stripe",
    PayPal => "paypal",
    Netopia => "netopia",
    CashOnDelivery => "cash_on_delivery",
});

impl PaymentMethod {
    /// The provider whose webhooks confirm payments made with this method, if any.
    pub fn provider(&self) -> Option<WebhookProvider> {
        match self {
            Self::Stripe => Some(WebhookProvider::Stripe),
            Self::PayPal => Some(WebhookProvider::PayPal),
            Self::Netopia => Some(WebhookProvider::Netopia),
            Self::CashOnDelivery => None,
        }
    }

    /// The status a freshly created order starts in.
    pub fn initial_status(&self) -> OrderStatusType {
        match self.provider() {
            Some(_) => OrderStatusType::PendingPayment,
            None => OrderStatusType::PendingAcceptance,
        }
    }
}

//--------------------------------------   WebhookProvider     ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookProvider {
    Stripe,
    #[serde(rename = "paypal")]
    PayPal,
    Netopia,
}

string_enum!(WebhookProvider {
    Stripe => "stripe",
    PayPal => "paypal",
    Netopia => "netopia",
});

impl WebhookProvider {
    pub const ALL: [WebhookProvider; 3] = [Self::Stripe, Self::PayPal, Self::Netopia];

    /// Each provider deduplicates in its own table.
    pub fn table_name(&self) -> &'static str {
        match self {
            Self::Stripe => "stripe_webhook_events",
            Self::PayPal => "paypal_webhook_events",
            Self::Netopia => "netopia_webhook_events",
        }
    }

    pub fn payment_method(&self) -> PaymentMethod {
        match self {
            Self::Stripe => PaymentMethod::Stripe,
            Self::PayPal => PaymentMethod::PayPal,
            Self::Netopia => PaymentMethod::Netopia,
        }
    }
}

//--------------------------------------        Order          ---------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub reference_code: String,
    pub customer_id: String,
    pub currency: String,
    pub subtotal: Money,
    pub discount: Money,
    pub shipping_amount: Money,
    pub fee_amount: Money,
    pub tax_amount: Money,
    pub total_amount: Money,
    pub shipping_method: Option<String>,
    #[sqlx(try_from = "String")]
    pub status: OrderStatusType,
    #[sqlx(try_from = "String")]
    pub payment_method: PaymentMethod,
    pub provider_reference: Option<String>,
    pub promo_code: Option<String>,
    pub payment_retry_count: i64,
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

//--------------------------------------        NewOrder       ---------------------------------------------------------
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub id: OrderId,
    pub reference_code: String,
    pub customer_id: String,
    pub currency: String,
    pub subtotal: Money,
    pub discount: Money,
    pub shipping_amount: Money,
    pub fee_amount: Money,
    pub tax_amount: Money,
    pub total_amount: Money,
    pub shipping_method: Option<String>,
    pub status: OrderStatusType,
    pub payment_method: PaymentMethod,
    pub provider_reference: Option<String>,
    pub promo_code: Option<String>,
    pub created_at: DateTime<Utc>,
}

//--------------------------------------      OrderEvent       ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderEventKind {
    Created,
    StatusChange,
    PromoCounted,
    PaymentFailed,
    ProviderLinked,
}

string_enum!(OrderEventKind {
    Created => "created",
    StatusChange => "status_change",
    PromoCounted => "promo_counted",
    PaymentFailed => "payment_failed",
    ProviderLinked => "provider_linked",
});

/// One row of an order's append-only replay log.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct OrderEvent {
    pub id: i64,
    pub order_id: OrderId,
    #[sqlx(try_from = "String")]
    pub kind: OrderEventKind,
    pub payload: String,
    pub created_at: DateTime<Utc>,
}

impl OrderEvent {
    pub fn payload_json(&self) -> Value {
        serde_json::from_str(&self.payload).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone)]
pub struct NewOrderEvent {
    pub order_id: OrderId,
    pub kind: OrderEventKind,
    pub payload: Value,
}

impl NewOrderEvent {
    pub fn new(order_id: OrderId, kind: OrderEventKind, payload: Value) -> Self {
        Self { order_id, kind, payload }
    }
}

//--------------------------------------      PromoCode        ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromoDiscountType {
    Percentage,
    Flat,
}

string_enum!(PromoDiscountType {
    Percentage => "percentage",
    Flat => "flat",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromoDiscount {
    /// Percent off the cart subtotal, e.g. `10` for 10%.
    Percentage(Decimal),
    Flat(Money),
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct PromoCode {
    pub code: String,
    #[sqlx(try_from = "String")]
    pub discount_type: PromoDiscountType,
    /// Stored as decimal text so that percentages keep their precision on both backends.
    pub discount_value: String,
    pub currency: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub max_uses: Option<i64>,
    pub times_used: i64,
    pub active: bool,
}

impl PromoCode {
    pub fn discount(&self) -> Result<PromoDiscount, ConversionError> {
        match self.discount_type {
            PromoDiscountType::Percentage => Decimal::from_str(&self.discount_value)
                .map(PromoDiscount::Percentage)
                .map_err(|e| ConversionError(format!("Invalid percentage for promo {}: {e}", self.code))),
            PromoDiscountType::Flat => Money::from_str(&self.discount_value)
                .map(PromoDiscount::Flat)
                .map_err(|e| ConversionError(format!("Invalid amount for promo {}: {e}", self.code))),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.max_uses.map(|max| self.times_used >= max).unwrap_or(false)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|t| t <= now).unwrap_or(false)
    }
}

#[derive(Debug, Clone)]
pub struct NewPromoCode {
    pub code: String,
    pub discount_type: PromoDiscountType,
    pub discount_value: String,
    pub currency: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub max_uses: Option<i64>,
    pub active: bool,
}

impl NewPromoCode {
    pub fn percentage(code: &str, percent: Decimal, currency: &str) -> Self {
        Self {
            code: code.to_string(),
            discount_type: PromoDiscountType::Percentage,
            discount_value: percent.to_string(),
            currency: currency.to_string(),
            expires_at: None,
            max_uses: None,
            active: true,
        }
    }

    pub fn flat(code: &str, amount: Money, currency: &str) -> Self {
        Self {
            code: code.to_string(),
            discount_type: PromoDiscountType::Flat,
            discount_value: amount.to_string(),
            currency: currency.to_string(),
            expires_at: None,
            max_uses: None,
            active: true,
        }
    }

    pub fn with_max_uses(mut self, max_uses: i64) -> Self {
        self.max_uses = Some(max_uses);
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }
}

//--------------------------------------     WebhookEvent      ---------------------------------------------------------
/// A row in one of the per-provider dedup tables. `event_id` is the provider's own id, stored byte for byte.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct WebhookEvent {
    pub event_id: String,
    pub event_type: String,
    pub first_seen_at: DateTime<Utc>,
    pub attempts: i64,
    pub last_attempt_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub payload: String,
}

impl WebhookEvent {
    pub fn is_processed(&self) -> bool {
        self.processed_at.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct NewWebhookEvent {
    pub event_id: String,
    pub event_type: String,
    pub payload: String,
}

//--------------------------------------      AuditChain       ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditChain {
    Product,
    Content,
    Security,
}

string_enum!(AuditChain {
    Product => "product",
    Content => "content",
    Security => "security",
});

impl AuditChain {
    pub const ALL: [AuditChain; 3] = [Self::Product, Self::Content, Self::Security];

    pub fn table_name(&self) -> &'static str {
        match self {
            Self::Product => "product_audit_log",
            Self::Content => "content_audit_log",
            Self::Security => "security_audit_log",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct AuditEntry {
    pub id: i64,
    pub action: String,
    pub actor: String,
    pub subject: String,
    pub payload: String,
    pub created_at: DateTime<Utc>,
    pub prev_hash: Option<String>,
    pub hash: Option<String>,
}

impl AuditEntry {
    pub fn payload_json(&self) -> Value {
        serde_json::from_str(&self.payload).unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub action: String,
    pub actor: String,
    pub subject: String,
    pub payload: Value,
}

impl NewAuditEntry {
    pub fn new<A: Into<String>, B: Into<String>, C: Into<String>>(action: A, actor: B, subject: C) -> Self {
        Self { action: action.into(), actor: actor.into(), subject: subject.into(), payload: Value::Null }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}

/// The fully materialised row that gets written to an audit table.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub action: String,
    pub actor: String,
    pub subject: String,
    pub payload: String,
    pub created_at: DateTime<Utc>,
    pub prev_hash: Option<String>,
    pub hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct ChainState {
    pub chain_name: String,
    pub tail_hash: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn status_strings() {
        for s in ["pending_payment", "pending_acceptance", "paid", "shipped", "delivered", "cancelled", "refunded"] {
            let status: OrderStatusType = s.parse().unwrap();
            assert_eq!(status.as_str(), s);
        }
        assert!("Paid".parse::<OrderStatusType>().is_err());
        assert!(OrderStatusType::Refunded.is_terminal());
        assert!(!OrderStatusType::Delivered.is_terminal());
    }

    #[test]
    fn initial_status_depends_on_payment_method() {
        assert_eq!(PaymentMethod::Stripe.initial_status(), OrderStatusType::PendingPayment);
        assert_eq!(PaymentMethod::Netopia.initial_status(), OrderStatusType::PendingPayment);
        assert_eq!(PaymentMethod::CashOnDelivery.initial_status(), OrderStatusType::PendingAcceptance);
        assert_eq!(WebhookProvider::PayPal.payment_method(), PaymentMethod::PayPal);
        assert_eq!(serde_json::to_string(&PaymentMethod::PayPal).unwrap(), "\"paypal\"");
    }

    #[test]
    fn promo_discounts() {
        let promo = PromoCode {
            code: "SPRING10".into(),
            discount_type: PromoDiscountType::Percentage,
            discount_value: "12.5".into(),
            currency: "RON".into(),
            expires_at: None,
            max_uses: Some(2),
            times_used: 2,
            active: true,
        };
        assert_eq!(promo.discount().unwrap(), PromoDiscount::Percentage(Decimal::new(125, 1)));
        assert!(promo.is_exhausted());
        let flat = PromoCode { discount_type: PromoDiscountType::Flat, discount_value: "10.00".into(), ..promo };
        assert_eq!(flat.discount().unwrap(), PromoDiscount::Flat(Money::from_cents(1000)));
    }
}
