//! Signature checks for the payment provider webhooks.
//!
//! These are pure functions of the headers, the raw body, the shared secret and (for Stripe) the current time. The
//! [`crate::middleware::SignatureMiddlewareFactory`] calls them before a request reaches any handler.
use actix_http::h1;
use actix_web::{dev::Payload, web};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::errors::SignatureError;

type HmacSha256 = Hmac<Sha256>;

pub const STRIPE_SIGNATURE_HEADER: &str = "Stripe-Signature";
pub const PAYPAL_TRANSMISSION_ID_HEADER: &str = "PayPal-Transmission-Id";
pub const PAYPAL_SIGNATURE_HEADER: &str = "PayPal-Transmission-Sig";
pub const NETOPIA_SIGNATURE_HEADER: &str = "Verification-Token";

fn new_mac(secret: &str) -> Result<HmacSha256, SignatureError> {
    if secret.is_empty() {
        return Err(SignatureError::NoSecret);
    }
    HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::NoSecret)
}

/// The raw HMAC-SHA256 of `data` under `secret`.
pub fn calculate_hmac(secret: &str, data: &[u8]) -> Result<Vec<u8>, SignatureError> {
    let mut mac = new_mac(secret)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Checks a `Stripe-Signature: t=<unix>,v1=<hex>` header.
///
/// The signed payload is `"{t}.{body}"`. Stripe may send several `v1` entries while a secret is being rolled; any one
/// of them matching is enough. The timestamp must be within `tolerance` of `now` in either direction.
pub fn verify_stripe_signature(
    header: &str,
    body: &[u8],
    secret: &str,
    now: DateTime<Utc>,
    tolerance: Duration,
) -> Result<(), SignatureError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        let part = part.trim();
        if let Some(t) = part.strip_prefix("t=") {
            timestamp = Some(t);
        } else if let Some(v) = part.strip_prefix("v1=") {
            signatures.push(v);
        }
    }
    let timestamp = timestamp.ok_or(SignatureError::MalformedHeader(STRIPE_SIGNATURE_HEADER))?;
    if signatures.is_empty() {
        return Err(SignatureError::MalformedHeader(STRIPE_SIGNATURE_HEADER));
    }
    let ts = timestamp.parse::<i64>().map_err(|_| SignatureError::MalformedHeader(STRIPE_SIGNATURE_HEADER))?;
    let mut mac = new_mac(secret)?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);
    let matched = signatures
        .into_iter()
        .filter_map(|s| hex::decode(s).ok())
        .any(|sig| mac.clone().verify_slice(&sig).is_ok());
    if !matched {
        return Err(SignatureError::Mismatch);
    }
    if (now.timestamp() - ts).abs() > tolerance.num_seconds() {
        return Err(SignatureError::Expired);
    }
    Ok(())
}

/// Checks `PayPal-Transmission-Sig`, the base64 HMAC-SHA256 of `"{transmission_id}|{body}"`.
pub fn verify_paypal_signature(
    transmission_id: &str,
    signature: &str,
    body: &[u8],
    secret: &str,
) -> Result<(), SignatureError> {
    let sig = base64::decode(signature.trim()).map_err(|_| SignatureError::MalformedHeader(PAYPAL_SIGNATURE_HEADER))?;
    let mut mac = new_mac(secret)?;
    mac.update(transmission_id.as_bytes());
    mac.update(b"|");
    mac.update(body);
    mac.verify_slice(&sig).map_err(|_| SignatureError::Mismatch)
}

/// Checks Netopia's `Verification-Token`, the hex HMAC-SHA256 of the body.
pub fn verify_netopia_signature(token: &str, body: &[u8], secret: &str) -> Result<(), SignatureError> {
    let sig = hex::decode(token.trim()).map_err(|_| SignatureError::MalformedHeader(NETOPIA_SIGNATURE_HEADER))?;
    let mut mac = new_mac(secret)?;
    mac.update(body);
    mac.verify_slice(&sig).map_err(|_| SignatureError::Mismatch)
}

/// Puts an already-read body back into a request so that the handler's extractors can read it again.
pub fn bytes_to_payload(buf: web::Bytes) -> Payload {
    let (_, mut pl) = h1::Payload::create(true);
    pl.unread_data(buf);
    Payload::from(pl)
}
