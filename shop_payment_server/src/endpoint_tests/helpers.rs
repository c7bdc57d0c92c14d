use std::{str::FromStr, sync::Arc};

use actix_web::{body::MessageBody, http::StatusCode, test, test::TestRequest, web, App};
use chrono::Duration;
use log::debug;
use rust_decimal::Decimal;
use shop_payment_engine::{
    db_types::{Order, PaymentMethod},
    pricing::{CartLine, PricingConfig},
    test_utils::{prepare_test_env, random_db_path, FixedClock},
    AuditSettings,
    CheckoutRequest,
    Clock,
    OrderFlowApi,
    OrderFlowSettings,
    SqliteDatabase,
    WebhookApi,
};
use spg_common::Secret;

use crate::{
    config::WebhookConfig,
    helpers::calculate_hmac,
    routes::health,
    server::configure_webhook_routes,
};

pub const STRIPE_SECRET: &str = "whsec_endpoint_tests";
pub const PAYPAL_SECRET: &str = "paypal_endpoint_tests";
pub const NETOPIA_SECRET: &str = "netopia_endpoint_tests";

/// A throwaway database and the engine APIs a webhook test needs, all on one controllable clock.
pub struct TestShop {
    pub db: SqliteDatabase,
    pub clock: FixedClock,
    pub orders: OrderFlowApi<SqliteDatabase>,
    pub webhooks: WebhookConfig,
}

impl TestShop {
    pub async fn new() -> Self {
        let db = prepare_test_env(&random_db_path()).await;
        let clock = FixedClock::default();
        let settings = OrderFlowSettings::new("RON", PricingConfig::default(), AuditSettings::unchained());
        let orders = OrderFlowApi::new(db.clone(), settings, Arc::new(clock.clone()));
        let webhooks = WebhookConfig {
            stripe_secret: Secret::from(STRIPE_SECRET),
            paypal_secret: Secret::from(PAYPAL_SECRET),
            netopia_secret: Secret::from(NETOPIA_SECRET),
            ..Default::default()
        };
        Self { db, clock, orders, webhooks }
    }

    pub fn without_signature_checks(mut self) -> Self {
        self.webhooks.signature_checks = false;
        self
    }

    pub async fn order_paid_with(&self, method: PaymentMethod, reference: &str) -> Order {
        let request = CheckoutRequest::new("cust-42", "RON", method)
            .with_line(CartLine::new("MUG-01", Decimal::from_str("25.00").unwrap(), 2))
            .with_provider_reference(reference);
        self.orders.create_order(request).await.expect("Could not create order").0
    }

    pub async fn fetch_order(&self, order: &Order) -> Order {
        self.orders.fetch_order(&order.id).await.unwrap().expect("Order disappeared")
    }

    pub fn webhook_api(&self) -> WebhookApi<SqliteDatabase> {
        WebhookApi::new(self.db.clone(), AuditSettings::unchained(), Arc::new(self.clock.clone()))
    }

    /// Sends `req` through an app with the health route and the three webhook routes.
    ///
    /// Errors raised by middleware are turned into the response the client would have seen.
    pub async fn send(&self, req: TestRequest) -> (StatusCode, String) {
        let api = web::Data::new(self.webhook_api());
        let webhooks = self.webhooks.clone();
        let clock: Arc<dyn Clock> = Arc::new(self.clock.clone());
        let app = App::new()
            .app_data(api)
            .service(health)
            .configure(move |cfg| configure_webhook_routes::<SqliteDatabase>(cfg, &webhooks, clock));
        let service = test::init_service(app).await;
        debug!("Making request");
        match test::try_call_service(&service, req.to_request()).await {
            Ok(res) => {
                let (_, res) = res.into_parts();
                let status = res.status();
                let body = String::from_utf8_lossy(&res.into_body().try_into_bytes().unwrap()).into_owned();
                (status, body)
            },
            Err(e) => (e.as_response_error().status_code(), e.to_string()),
        }
    }

    pub fn stripe_request(&self, body: &str) -> TestRequest {
        let header = stripe_signature(body, self.clock.now().timestamp(), STRIPE_SECRET);
        TestRequest::post().uri("/webhook/stripe").insert_header(("Stripe-Signature", header)).set_payload(body.to_string())
    }

    pub fn paypal_request(&self, transmission_id: &str, body: &str) -> TestRequest {
        let mut signed = format!("{transmission_id}|").into_bytes();
        signed.extend_from_slice(body.as_bytes());
        let sig = base64::encode(calculate_hmac(PAYPAL_SECRET, &signed).unwrap());
        TestRequest::post()
            .uri("/webhook/paypal")
            .insert_header(("PayPal-Transmission-Id", transmission_id.to_string()))
            .insert_header(("PayPal-Transmission-Sig", sig))
            .set_payload(body.to_string())
    }

    pub fn netopia_request(&self, body: &str) -> TestRequest {
        let token = hex::encode(calculate_hmac(NETOPIA_SECRET, body.as_bytes()).unwrap());
        TestRequest::post()
            .uri("/webhook/netopia")
            .insert_header(("Verification-Token", token))
            .set_payload(body.to_string())
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }
}

pub fn stripe_signature(body: &str, timestamp: i64, secret: &str) -> String {
    let signed = format!("{timestamp}.{body}");
    format!("t={timestamp},v1={}", hex::encode(calculate_hmac(secret, signed.as_bytes()).unwrap()))
}
