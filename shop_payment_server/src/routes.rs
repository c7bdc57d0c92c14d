//! Request handler definitions
//!
//! Define each route and its handler here.
//! Handlers that are more than a line or two MUST go into a separate module. Keep this module neat and tidy 🙏
//!
//! Every webhook route is wrapped in the signature middleware for its provider, so a handler only ever sees bodies
//! that the provider really signed. Handlers must not block: parsing is cheap and all storage access is async.
use actix_web::{get, web, HttpResponse, Responder};
use log::*;
use shop_payment_engine::{db_types::WebhookProvider, traits::PaymentStore, WebhookApi, WebhookOutcome};

use crate::{data_objects::JsonResponse, errors::ServerError, integrations::parse_notification};

// Web-actix cannot handle generics in handlers, so it's implemented manually using the `route!` macro
#[macro_export]
macro_rules! route {
    ($name:ident => $method:ident $path:literal impl $bound:ty where signed) => {
        paste::paste! {
            pub struct [<$name:camel Route>]<[<T $bound:camel>]> {
                _backend: core::marker::PhantomData<fn() -> [<T $bound:camel>]>,
                verifier: $crate::middleware::SignatureMiddlewareFactory,
            }
        }
        paste::paste! { impl<[<T $bound:camel>]> [<$name:camel Route>]<[<T $bound:camel>]> {
            pub fn new(verifier: $crate::middleware::SignatureMiddlewareFactory) -> Self {
                Self { _backend: core::marker::PhantomData, verifier }
            }
        }}
        paste::paste! { impl<[<T $bound:camel>]> actix_web::dev::HttpServiceFactory for [<$name:camel Route>]<[<T $bound:camel>]>
        where
            [<T $bound:camel>]: $bound + 'static,
        {
            fn register(self, config: &mut actix_web::dev::AppService) {
                let res = actix_web::Resource::new($path)
                    .name(stringify!($name))
                    .guard(actix_web::guard::$method())
                    .to($name::<[<T $bound:camel>]>)
                    .wrap(self.verifier);
                actix_web::dev::HttpServiceFactory::register(res, config);
            }
        }}
    };
}

#[get("/health")]
pub async fn health() -> impl Responder {
    HttpResponse::Ok().body("👍️\n")
}

//----------------------------------------------   Webhooks  ----------------------------------------------------
route!(stripe_webhook => Post "/webhook/stripe" impl PaymentStore where signed);
pub async fn stripe_webhook<B: PaymentStore>(
    body: web::Bytes,
    api: web::Data<WebhookApi<B>>,
) -> Result<HttpResponse, ServerError> {
    ingest(WebhookProvider::Stripe, &body, api.as_ref()).await
}

route!(paypal_webhook => Post "/webhook/paypal" impl PaymentStore where signed);
pub async fn paypal_webhook<B: PaymentStore>(
    body: web::Bytes,
    api: web::Data<WebhookApi<B>>,
) -> Result<HttpResponse, ServerError> {
    ingest(WebhookProvider::PayPal, &body, api.as_ref()).await
}

route!(netopia_webhook => Post "/webhook/netopia" impl PaymentStore where signed);
pub async fn netopia_webhook<B: PaymentStore>(
    body: web::Bytes,
    api: web::Data<WebhookApi<B>>,
) -> Result<HttpResponse, ServerError> {
    ingest(WebhookProvider::Netopia, &body, api.as_ref()).await
}

/// Parses and processes a verified webhook body.
///
/// The provider gets a 200 for anything it should not send again, a 400 for a body that will never parse, and a 500
/// when a redelivery might succeed.
async fn ingest<B: PaymentStore>(
    provider: WebhookProvider,
    body: &[u8],
    api: &WebhookApi<B>,
) -> Result<HttpResponse, ServerError> {
    let notification = parse_notification(provider, body).map_err(|e| {
        warn!("🪝️ Unreadable {provider} webhook. {e}");
        ServerError::from(e)
    })?;
    debug!("🪝️ {provider} webhook {} ({}) received", notification.event_id, notification.event_type);
    let outcome = api.process(provider, &notification).await?;
    if let WebhookOutcome::Applied(transition) = &outcome {
        trace!("🪝️ {provider} event {} outcome: {transition:?}", notification.event_id);
    }
    Ok(HttpResponse::Ok().json(JsonResponse::from(&outcome)))
}
