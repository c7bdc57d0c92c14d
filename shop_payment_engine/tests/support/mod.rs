#![allow(dead_code)]
use std::{str::FromStr, sync::Arc};

use log::*;
use rust_decimal::Decimal;
use shop_payment_engine::{
    db_types::{PaymentMethod, WebhookProvider},
    pricing::{CartLine, FeeRule, PricingConfig, RoundingMode, TaxRule},
    test_utils::{prepare_test_env, random_db_path, FixedClock},
    AuditApi,
    AuditSettings,
    CheckoutRequest,
    OrderFlowApi,
    OrderFlowSettings,
    PaymentEffect,
    PaymentStore,
    SqliteDatabase,
    WebhookApi,
    WebhookNotification,
};
use sqlx::{migrate::MigrateDatabase, Sqlite};

pub const AUDIT_SECRET: &str = "integration-test-audit-secret";
pub const CURRENCY: &str = "RON";

/// Everything an integration test needs, wired to one throwaway SQLite database and a clock the test controls.
pub struct TestSystem {
    pub url: String,
    pub db: SqliteDatabase,
    pub clock: FixedClock,
    pub orders: OrderFlowApi<SqliteDatabase>,
    pub webhooks: WebhookApi<SqliteDatabase>,
    pub audit: AuditApi<SqliteDatabase>,
}

pub fn d(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

/// No fee, 19% VAT charged on the discounted goods and on shipping.
pub fn pricing() -> PricingConfig {
    PricingConfig::new(FeeRule::disabled(), TaxRule::vat(d("19")).on_shipping(true), RoundingMode::HalfUp)
}

pub async fn setup() -> TestSystem {
    setup_with_audit(AuditSettings::chained(AUDIT_SECRET)).await
}

pub async fn setup_with_audit(audit: AuditSettings) -> TestSystem {
    let url = random_db_path();
    let db = prepare_test_env(&url).await;
    let clock = FixedClock::default();
    let shared_clock = Arc::new(clock.clone());
    let settings = OrderFlowSettings::new(CURRENCY, pricing(), audit.clone());
    let orders = OrderFlowApi::new(db.clone(), settings, shared_clock.clone());
    let webhooks = WebhookApi::new(db.clone(), audit.clone(), shared_clock.clone());
    let audit = AuditApi::new(db.clone(), audit, shared_clock);
    TestSystem { url, db, clock, orders, webhooks, audit }
}

pub async fn tear_down(mut system: TestSystem) {
    if let Err(e) = system.db.close().await {
        error!("🚀️ Failed to close database: {e}");
    }
    if let Err(e) = Sqlite::drop_database(&system.url).await {
        warn!("🚀️ Could not remove {}: {e}", system.url);
    }
}

/// A 100.00 cart with 20.00 courier shipping, paid by card.
pub fn stripe_checkout(customer: &str, session: &str) -> CheckoutRequest {
    CheckoutRequest::new(customer, CURRENCY, PaymentMethod::Stripe)
        .with_line(CartLine::new("MUG-01", d("25.00"), 2))
        .with_line(CartLine::new("TEE-02", d("50.00"), 1))
        .with_shipping("courier", d("20.00"))
        .with_provider_reference(session)
}

pub fn captured(event_id: &str, reference: &str) -> WebhookNotification {
    WebhookNotification {
        event_id: event_id.to_string(),
        event_type: "checkout.session.completed".to_string(),
        payload: format!(r#"{{"id":"{event_id}","data":{{"object":{{"id":"{reference}"}}}}}}"#),
        effect: PaymentEffect::PaymentCaptured { reference: reference.to_string() },
    }
}

pub fn failed(event_id: &str, reference: &str, reason: &str) -> WebhookNotification {
    WebhookNotification {
        event_id: event_id.to_string(),
        event_type: "payment_intent.payment_failed".to_string(),
        payload: format!(r#"{{"id":"{event_id}"}}"#),
        effect: PaymentEffect::PaymentFailed { reference: reference.to_string(), reason: reason.to_string() },
    }
}

pub const STRIPE: WebhookProvider = WebhookProvider::Stripe;
