//! # Shop payment engine public API
//!
//! * [`order_flow_api`] creates orders from checkout and moves them through their lifecycle.
//! * [`webhook_api`] ingests payment provider notifications idempotently and feeds them into the order flow.
//! * [`promo_ledger`] counts promo code uses at most once per order.
//! * [`audit_api`] appends to the tamper-evident audit chains and verifies them offline.
//!
//! Each API is created by handing it a backend that implements [`crate::traits::PaymentStore`]:
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use shop_payment_engine::{OrderFlowApi, OrderFlowSettings, SqliteDatabase, SystemClock};
//! let db = SqliteDatabase::new_with_url("sqlite://data/shop.db", 5).await?;
//! let api = OrderFlowApi::new(db, settings, Arc::new(SystemClock));
//! let (order, breakdown) = api.create_order(checkout_request).await?;
//! ```
pub mod audit_api;
pub mod errors;
pub mod order_flow_api;
pub mod order_objects;
pub mod promo_ledger;
pub mod webhook_api;

pub use audit_api::{AuditApi, AuditSettings};
pub use errors::{AuditError, LeaderError, OrderFlowError, WebhookError};
pub use order_flow_api::{OrderFlowApi, OrderFlowSettings, EXPIRY_ACTOR};
pub use order_objects::{CheckoutRequest, ExpiryResult, ShippingSelection, TransitionOutcome};
pub use promo_ledger::{record_promo_usage, validate_promo_code, PromoUsage};
pub use webhook_api::{PaymentEffect, RetryPolicy, WebhookApi, WebhookNotification, WebhookOutcome};
