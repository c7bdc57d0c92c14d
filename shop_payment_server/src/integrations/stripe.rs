//! Stripe events.
//!
//! Orders paid through Stripe are linked to their PaymentIntent id. Checkout sessions and charges carry it in
//! `payment_intent`; PaymentIntent events carry it as the object's own `id`.
use log::*;
use serde::Deserialize;
use serde_json::Value;
use shop_payment_engine::{db_types::WebhookProvider, PaymentEffect, WebhookError, WebhookNotification};

use super::{body_to_string, invalid, str_at};

const PROVIDER: WebhookProvider = WebhookProvider::Stripe;

#[derive(Debug, Deserialize)]
struct StripeEvent {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: Value,
}

pub fn parse_notification(body: &[u8]) -> Result<WebhookNotification, WebhookError> {
    let payload = body_to_string(PROVIDER, body)?;
    let event = serde_json::from_str::<StripeEvent>(&payload).map_err(|e| invalid(PROVIDER, e.to_string()))?;
    let object = &event.data.object;
    let reference = |path: &[&str]| {
        str_at(object, path)
            .map(String::from)
            .ok_or_else(|| invalid(PROVIDER, format!("{} has no {}", event.event_type, path.join("."))))
    };
    let effect = match event.event_type.as_str() {
        "checkout.session.completed" => match str_at(object, &["payment_status"]) {
            Some("paid") | Some("no_payment_required") => {
                PaymentEffect::PaymentCaptured { reference: reference(&["payment_intent"])? }
            },
            status => {
                // Delayed methods (bank debits) complete the session first and confirm through payment_intent.*
                debug!("🪝️ Stripe session completed with payment status {status:?}. Waiting for the payment intent.");
                PaymentEffect::Ignored
            },
        },
        "payment_intent.succeeded" => PaymentEffect::PaymentCaptured { reference: reference(&["id"])? },
        "payment_intent.payment_failed" => {
            let reason = str_at(object, &["last_payment_error", "code"])
                .or_else(|| str_at(object, &["last_payment_error", "message"]))
                .unwrap_or("payment_failed")
                .to_string();
            PaymentEffect::PaymentFailed { reference: reference(&["id"])?, reason }
        },
        "charge.refunded" => {
            if object.get("refunded").and_then(Value::as_bool) == Some(false) {
                debug!("🪝️ Stripe charge was partially refunded. Only full refunds change the order.");
                PaymentEffect::Ignored
            } else {
                PaymentEffect::Refunded { reference: reference(&["payment_intent"])? }
            }
        },
        other => {
            trace!("🪝️ Stripe event type {other} is not handled");
            PaymentEffect::Ignored
        },
    };
    Ok(WebhookNotification { event_id: event.id, event_type: event.event_type, payload, effect })
}

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;

    fn event(event_type: &str, object: Value) -> Vec<u8> {
        json!({"id": "evt_1", "type": event_type, "data": {"object": object}}).to_string().into_bytes()
    }

    #[test]
    fn paid_checkout_session_captures_its_intent() {
        let body = event(
            "checkout.session.completed",
            json!({"id": "cs_1", "payment_intent": "pi_1", "payment_status": "paid"}),
        );
        let n = parse_notification(&body).unwrap();
        assert_eq!(n.event_id, "evt_1");
        assert_eq!(n.event_type, "checkout.session.completed");
        assert_eq!(n.effect, PaymentEffect::PaymentCaptured { reference: "pi_1".into() });
        assert_eq!(n.payload.as_bytes(), body.as_slice());
    }

    #[test]
    fn unpaid_checkout_session_is_ignored() {
        let body = event(
            "checkout.session.completed",
            json!({"id": "cs_1", "payment_intent": "pi_1", "payment_status": "unpaid"}),
        );
        assert_eq!(parse_notification(&body).unwrap().effect, PaymentEffect::Ignored);
    }

    #[test]
    fn payment_intent_events() {
        let ok = parse_notification(&event("payment_intent.succeeded", json!({"id": "pi_9"}))).unwrap();
        assert_eq!(ok.effect, PaymentEffect::PaymentCaptured { reference: "pi_9".into() });
        let failed = parse_notification(&event(
            "payment_intent.payment_failed",
            json!({"id": "pi_9", "last_payment_error": {"code": "card_declined", "message": "Your card was declined."}}),
        ))
        .unwrap();
        assert_eq!(failed.effect, PaymentEffect::PaymentFailed {
            reference: "pi_9".into(),
            reason: "card_declined".into()
        });
    }

    #[test]
    fn refunds() {
        let full = event("charge.refunded", json!({"id": "ch_1", "payment_intent": "pi_1", "refunded": true}));
        assert_eq!(parse_notification(&full).unwrap().effect, PaymentEffect::Refunded { reference: "pi_1".into() });
        let partial = event("charge.refunded", json!({"id": "ch_1", "payment_intent": "pi_1", "refunded": false}));
        assert_eq!(parse_notification(&partial).unwrap().effect, PaymentEffect::Ignored);
    }

    #[test]
    fn other_event_types_are_ignored() {
        let n = parse_notification(&event("customer.created", json!({"id": "cus_1"}))).unwrap();
        assert_eq!(n.effect, PaymentEffect::Ignored);
    }

    #[test]
    fn garbage_is_invalid() {
        assert!(matches!(parse_notification(b"not json"), Err(WebhookError::InvalidPayload { .. })));
        let no_intent = event("payment_intent.succeeded", json!({}));
        assert!(matches!(parse_notification(&no_intent), Err(WebhookError::InvalidPayload { .. })));
    }
}
