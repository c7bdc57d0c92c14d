//! Provider payload formats.
//!
//! Each provider module turns a verified webhook body into a [`WebhookNotification`]: the provider's event id, its
//! event type, the raw body and the [`shop_payment_engine::PaymentEffect`] the event has on an order. Event types the
//! shop does not act on parse to `PaymentEffect::Ignored` so that they are still acknowledged and deduplicated.
pub mod netopia;
pub mod paypal;
pub mod stripe;

use serde_json::Value;
use shop_payment_engine::{db_types::WebhookProvider, WebhookError, WebhookNotification};

/// Parses a stored or freshly received body for `provider`.
pub fn parse_notification(provider: WebhookProvider, body: &[u8]) -> Result<WebhookNotification, WebhookError> {
    match provider {
        WebhookProvider::Stripe => stripe::parse_notification(body),
        WebhookProvider::PayPal => paypal::parse_notification(body),
        WebhookProvider::Netopia => netopia::parse_notification(body),
    }
}

pub(crate) fn invalid(provider: WebhookProvider, reason: impl Into<String>) -> WebhookError {
    WebhookError::InvalidPayload { provider, reason: reason.into() }
}

pub(crate) fn body_to_string(provider: WebhookProvider, body: &[u8]) -> Result<String, WebhookError> {
    String::from_utf8(body.to_vec()).map_err(|_| invalid(provider, "The body is not valid UTF-8"))
}

/// Follows `path` through nested objects and returns the string at the end, if there is one.
pub(crate) fn str_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    path.iter().try_fold(value, |v, key| v.get(key)).and_then(Value::as_str).filter(|s| !s.is_empty())
}
