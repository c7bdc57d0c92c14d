//! Netopia IPN notifications.
//!
//! Netopia has no event ids. The same transaction is reported again each time its status changes, so the event id is
//! built from the transaction id and the status. A redelivery of the same status is then a duplicate, while a later
//! refund of the same transaction is a new event.
use log::*;
use serde::Deserialize;
use shop_payment_engine::{db_types::WebhookProvider, PaymentEffect, WebhookError, WebhookNotification};

use super::{body_to_string, invalid};

const PROVIDER: WebhookProvider = WebhookProvider::Netopia;

const STATUS_PAID: i64 = 3;
const STATUS_CONFIRMED: i64 = 5;
const STATUS_CREDIT: i64 = 11;
const STATUS_DECLINED: i64 = 12;

#[derive(Debug, Deserialize)]
struct NetopiaIpn {
    payment: NetopiaPayment,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NetopiaPayment {
    #[serde(rename = "ntpID")]
    ntp_id: String,
    status: i64,
    #[serde(default)]
    message: Option<String>,
}

pub fn parse_notification(body: &[u8]) -> Result<WebhookNotification, WebhookError> {
    let payload = body_to_string(PROVIDER, body)?;
    let ipn = serde_json::from_str::<NetopiaIpn>(&payload).map_err(|e| invalid(PROVIDER, e.to_string()))?;
    let NetopiaPayment { ntp_id, status, message } = ipn.payment;
    if ntp_id.trim().is_empty() {
        return Err(invalid(PROVIDER, "payment.ntpID is empty"));
    }
    let reference = ntp_id.clone();
    let effect = match status {
        STATUS_PAID | STATUS_CONFIRMED => PaymentEffect::PaymentCaptured { reference },
        STATUS_DECLINED => {
            let reason = message.filter(|m| !m.trim().is_empty()).unwrap_or_else(|| "declined".into());
            PaymentEffect::PaymentFailed { reference, reason }
        },
        STATUS_CREDIT => PaymentEffect::Refunded { reference },
        other => {
            trace!("🪝️ Netopia status {other} for {ntp_id} is not handled");
            PaymentEffect::Ignored
        },
    };
    Ok(WebhookNotification {
        event_id: format!("{ntp_id}:{status}"),
        event_type: format!("payment.status.{status}"),
        payload,
        effect,
    })
}
