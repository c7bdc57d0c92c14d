//! Webhook signature middleware for Actix Web.
//!
//! Every payment provider signs its webhook bodies with a secret shared with the shop, but each one does it
//! differently:
//!
//! * Stripe sends `Stripe-Signature: t=<unix>,v1=<hex>`, signing `"{t}.{body}"`. Old timestamps are refused so that a
//!   captured request cannot be replayed later.
//! * PayPal sends `PayPal-Transmission-Sig`, a base64 HMAC over `"{PayPal-Transmission-Id}|{body}"`.
//! * Netopia sends `Verification-Token`, a hex HMAC over the body.
//!
//! Wrap each provider's webhook route with a [`SignatureMiddlewareFactory`] for its scheme. A request that fails the
//! check gets a `401` and never reaches the handler, so nothing is written to storage for it.
use std::{
    future::{ready, Ready},
    rc::Rc,
    sync::Arc,
};

use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    error::ErrorBadRequest,
    http::header::HeaderMap,
    web,
    Error,
};
use chrono::Duration;
use futures::future::LocalBoxFuture;
use log::{trace, warn};
use shop_payment_engine::{db_types::WebhookProvider, Clock};
use spg_common::Secret;

use crate::{
    errors::{ServerError, SignatureError},
    helpers::{
        bytes_to_payload,
        verify_netopia_signature,
        verify_paypal_signature,
        verify_stripe_signature,
        NETOPIA_SIGNATURE_HEADER,
        PAYPAL_SIGNATURE_HEADER,
        PAYPAL_TRANSMISSION_ID_HEADER,
        STRIPE_SIGNATURE_HEADER,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureScheme {
    Stripe { tolerance: Duration },
    PayPal,
    Netopia,
}

impl SignatureScheme {
    pub fn provider(&self) -> WebhookProvider {
        match self {
            Self::Stripe { .. } => WebhookProvider::Stripe,
            Self::PayPal => WebhookProvider::PayPal,
            Self::Netopia => WebhookProvider::Netopia,
        }
    }

    pub fn verify(
        &self,
        headers: &HeaderMap,
        body: &[u8],
        secret: &str,
        clock: &dyn Clock,
    ) -> Result<(), SignatureError> {
        match self {
            Self::Stripe { tolerance } => {
                let header = header_value(headers, STRIPE_SIGNATURE_HEADER)?;
                verify_stripe_signature(header, body, secret, clock.now(), *tolerance)
            },
            Self::PayPal => {
                let transmission_id = header_value(headers, PAYPAL_TRANSMISSION_ID_HEADER)?;
                let signature = header_value(headers, PAYPAL_SIGNATURE_HEADER)?;
                verify_paypal_signature(transmission_id, signature, body, secret)
            },
            Self::Netopia => {
                let token = header_value(headers, NETOPIA_SIGNATURE_HEADER)?;
                verify_netopia_signature(token, body, secret)
            },
        }
    }
}

fn header_value<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<&'a str, SignatureError> {
    headers
        .get(name)
        .ok_or(SignatureError::MissingHeader(name))?
        .to_str()
        .map_err(|_| SignatureError::MalformedHeader(name))
}

#[derive(Clone)]
pub struct SignatureMiddlewareFactory {
    scheme: SignatureScheme,
    key: Secret<String>,
    // If false, then the middleware will not check the signature and always allow the call
    enabled: bool,
    clock: Arc<dyn Clock>,
}

impl SignatureMiddlewareFactory {
    pub fn new(scheme: SignatureScheme, key: Secret<String>, enabled: bool, clock: Arc<dyn Clock>) -> Self {
        SignatureMiddlewareFactory { scheme, key, enabled, clock }
    }
}

impl<S, B> Transform<S, ServiceRequest> for SignatureMiddlewareFactory
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Error = Error;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;
    type InitError = ();
    type Response = ServiceResponse<B>;
    type Transform = SignatureMiddlewareService<S>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(SignatureMiddlewareService {
            scheme: self.scheme,
            key: self.key.clone(),
            enabled: self.enabled,
            clock: Arc::clone(&self.clock),
            service: Rc::new(service),
        }))
    }
}

pub struct SignatureMiddlewareService<S> {
    scheme: SignatureScheme,
    key: Secret<String>,
    enabled: bool,
    clock: Arc<dyn Clock>,
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for SignatureMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;
    type Response = ServiceResponse<B>;

    forward_ready!(service);

    fn call(&self, mut req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);
        let key = self.key.clone();
        let scheme = self.scheme;
        let enabled = self.enabled;
        let clock = Arc::clone(&self.clock);
        Box::pin(async move {
            let provider = scheme.provider();
            trace!("🔐️ Checking {provider} webhook signature");
            if !enabled {
                trace!("🔐️ Signature checks are disabled. Allowing {provider} request.");
                return service.call(req).await;
            }
            let data = req.extract::<web::Bytes>().await.map_err(|e| {
                warn!("🔐️ Failed to extract request data: {:?}", e);
                ErrorBadRequest("Failed to extract request data.")
            })?;
            match scheme.verify(req.headers(), data.as_ref(), key.reveal(), clock.as_ref()) {
                Ok(()) => {
                    trace!("🔐️ {provider} signature check ✅️");
                    req.set_payload(bytes_to_payload(data));
                    service.call(req).await
                },
                Err(e) => {
                    warn!("🔐️ Rejected {provider} webhook. {e}");
                    Err(ServerError::InvalidSignature(e).into())
                },
            }
        })
    }
}

#[cfg(test)]
mod test {
    use actix_web::http::header::{HeaderName, HeaderValue};
    use chrono::{DateTime, TimeZone, Utc};
    use mockall::mock;

    use super::*;
    use crate::helpers::calculate_hmac;

    mock! {
        pub WallClock {}
        impl Clock for WallClock {
            fn now(&self) -> DateTime<Utc>;
        }
    }

    const BODY: &[u8] = br#"{"payment":{"ntpID":"1","status":3}}"#;

    fn headers(pairs: &[(&'static str, String)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(HeaderName::from_bytes(name.as_bytes()).unwrap(), HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[test]
    fn stripe_reads_the_clock_once() {
        let now = Utc.timestamp_opt(1_772_366_400, 0).unwrap();
        let mut clock = MockWallClock::new();
        clock.expect_now().times(1).return_const(now);
        let mut signed = format!("{}.", now.timestamp()).into_bytes();
        signed.extend_from_slice(BODY);
        let header = format!("t={},v1={}", now.timestamp(), hex::encode(calculate_hmac("k", &signed).unwrap()));
        let scheme = SignatureScheme::Stripe { tolerance: Duration::seconds(300) };
        let map = headers(&[(STRIPE_SIGNATURE_HEADER, header)]);
        assert!(scheme.verify(&map, BODY, "k", &clock).is_ok());
        assert_eq!(scheme.provider(), WebhookProvider::Stripe);
    }

    #[test]
    fn hmac_only_schemes_never_read_the_clock() {
        let mut clock = MockWallClock::new();
        clock.expect_now().never();
        let token = hex::encode(calculate_hmac("k", BODY).unwrap());
        let map = headers(&[(NETOPIA_SIGNATURE_HEADER, token)]);
        assert!(SignatureScheme::Netopia.verify(&map, BODY, "k", &clock).is_ok());
        let err = SignatureScheme::PayPal.verify(&map, BODY, "k", &clock).unwrap_err();
        assert_eq!(err, SignatureError::MissingHeader(PAYPAL_TRANSMISSION_ID_HEADER));
    }

    #[test]
    fn missing_header_is_reported_by_name() {
        let mut clock = MockWallClock::new();
        clock.expect_now().never();
        let err = SignatureScheme::Stripe { tolerance: Duration::seconds(300) }
            .verify(&HeaderMap::new(), BODY, "k", &clock)
            .unwrap_err();
        assert_eq!(err, SignatureError::MissingHeader(STRIPE_SIGNATURE_HEADER));
    }
}
