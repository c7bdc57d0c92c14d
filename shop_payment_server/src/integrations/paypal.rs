//! PayPal webhook events.
//!
//! Orders paid through PayPal are linked to the PayPal order id. Capture and refund resources point back to it in
//! `supplementary_data.related_ids.order_id`.
use log::*;
use serde::Deserialize;
use serde_json::Value;
use shop_payment_engine::{db_types::WebhookProvider, PaymentEffect, WebhookError, WebhookNotification};

use super::{body_to_string, invalid, str_at};

const PROVIDER: WebhookProvider = WebhookProvider::PayPal;
const ORDER_ID_PATH: [&str; 3] = ["supplementary_data", "related_ids", "order_id"];

#[derive(Debug, Deserialize)]
struct PayPalEvent {
    id: String,
    event_type: String,
    #[serde(default)]
    resource: Value,
}

pub fn parse_notification(body: &[u8]) -> Result<WebhookNotification, WebhookError> {
    let payload = body_to_string(PROVIDER, body)?;
    let event = serde_json::from_str::<PayPalEvent>(&payload).map_err(|e| invalid(PROVIDER, e.to_string()))?;
    let reference = || {
        str_at(&event.resource, &ORDER_ID_PATH)
            .map(String::from)
            .ok_or_else(|| invalid(PROVIDER, format!("{} has no related order id", event.event_type)))
    };
    let effect = match event.event_type.as_str() {
        // The buyer approved, but nothing has been captured yet
        "CHECKOUT.ORDER.APPROVED" => PaymentEffect::Ignored,
        "PAYMENT.CAPTURE.COMPLETED" => PaymentEffect::PaymentCaptured { reference: reference()? },
        "PAYMENT.CAPTURE.DENIED" => {
            let reason = str_at(&event.resource, &["status_details", "reason"]).unwrap_or("PAYMENT_DENIED").to_string();
            PaymentEffect::PaymentFailed { reference: reference()?, reason }
        },
        "PAYMENT.CAPTURE.REFUNDED" => PaymentEffect::Refunded { reference: reference()? },
        other => {
            trace!("🪝️ PayPal event type {other} is not handled");
            PaymentEffect::Ignored
        },
    };
    Ok(WebhookNotification { event_id: event.id, event_type: event.event_type, payload, effect })
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;

    fn event(event_type: &str, resource: Value) -> Vec<u8> {
        json!({"id": "WH-1", "event_type": event_type, "resource": resource}).to_string().into_bytes()
    }

    fn capture(extra: Value) -> Value {
        let mut resource = json!({"id": "CAP-1", "supplementary_data": {"related_ids": {"order_id": "5O190127TN364715T"}}});
        if let (Some(r), Some(e)) = (resource.as_object_mut(), extra.as_object()) {
            r.extend(e.clone());
        }
        resource
    }

    #[test]
    fn captures_and_refunds_use_the_related_order() {
        let n = parse_notification(&event("PAYMENT.CAPTURE.COMPLETED", capture(json!({})))).unwrap();
        assert_eq!(n.event_id, "WH-1");
        assert_eq!(n.effect, PaymentEffect::PaymentCaptured { reference: "5O190127TN364715T".into() });
        let n = parse_notification(&event("PAYMENT.CAPTURE.REFUNDED", capture(json!({})))).unwrap();
        assert_eq!(n.effect, PaymentEffect::Refunded { reference: "5O190127TN364715T".into() });
    }

    #[test]
    fn denied_capture_carries_the_reason() {
        let resource = capture(json!({"status_details": {"reason": "RISK_DECLINED"}}));
        let n = parse_notification(&event("PAYMENT.CAPTURE.DENIED", resource)).unwrap();
        assert_eq!(n.effect, PaymentEffect::PaymentFailed {
            reference: "5O190127TN364715T".into(),
            reason: "RISK_DECLINED".into()
        });
    }

    #[test]
    fn approval_is_acknowledged_but_ignored() {
        let n = parse_notification(&event("CHECKOUT.ORDER.APPROVED", json!({"id": "5O190127TN364715T"}))).unwrap();
        assert_eq!(n.effect, PaymentEffect::Ignored);
    }

    #[test]
    fn capture_without_an_order_is_invalid() {
        let body = event("PAYMENT.CAPTURE.COMPLETED", json!({"id": "CAP-1"}));
        assert!(matches!(parse_notification(&body), Err(WebhookError::InvalidPayload { .. })));
    }
}
