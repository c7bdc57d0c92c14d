use std::{str::FromStr, sync::Arc};

use cucumber::World;
use log::*;
use rust_decimal::Decimal;
use shop_payment_engine::{
    db_types::Order,
    pricing::{FeeRule, PricingConfig, RoundingMode, TaxRule},
    test_utils::{prepare_test_env, random_db_path, FixedClock},
    AuditApi,
    AuditSettings,
    OrderFlowApi,
    OrderFlowSettings,
    SqliteDatabase,
    WebhookApi,
    WebhookOutcome,
};

pub const CURRENCY: &str = "RON";
const AUDIT_SECRET: &str = "cucumber-audit-secret";

#[derive(Default, Debug, World)]
pub struct ShopWorld {
    pub system: Option<OrderManagementSystem>,
    pub last_order: Option<Order>,
    pub last_outcome: Option<WebhookOutcome>,
}

#[derive(Debug)]
pub struct OrderManagementSystem {
    pub db_path: String,
    pub db: SqliteDatabase,
    pub clock: FixedClock,
    pub orders: OrderFlowApi<SqliteDatabase>,
    pub webhooks: WebhookApi<SqliteDatabase>,
    pub audit: AuditApi<SqliteDatabase>,
}

impl ShopWorld {
    pub fn system(&self) -> &OrderManagementSystem {
        self.system.as_ref().expect("The order management system is not initialised")
    }

    pub fn last_order(&self) -> &Order {
        self.last_order.as_ref().expect("No order has been placed yet")
    }
}

impl OrderManagementSystem {
    pub async fn new() -> Self {
        let url = random_db_path();
        let db = prepare_test_env(&url).await;
        debug!("Created database: {url}");
        let clock = FixedClock::default();
        let shared = Arc::new(clock.clone());
        let vat = TaxRule::vat(Decimal::from_str("19").expect("Invalid VAT rate")).on_shipping(true);
        let pricing = PricingConfig::new(FeeRule::disabled(), vat, RoundingMode::HalfUp);
        let audit = AuditSettings::chained(AUDIT_SECRET);
        let settings = OrderFlowSettings::new(CURRENCY, pricing, audit.clone());
        let orders = OrderFlowApi::new(db.clone(), settings, shared.clone());
        let webhooks = WebhookApi::new(db.clone(), audit.clone(), shared.clone());
        let audit = AuditApi::new(db.clone(), audit, shared);
        Self { db_path: url, db, clock, orders, webhooks, audit }
    }
}
