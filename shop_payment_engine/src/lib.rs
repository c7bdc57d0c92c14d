//! Shop Payment Engine
//!
//! The order and payment core of the shop payment gateway. It turns a checkout cart into a durably recorded order,
//! reconciles orders against payment provider notifications that may arrive late, twice or out of order, counts promo
//! code use exactly once, and keeps tamper-evident audit chains of sensitive changes. It is safe to run from several
//! server replicas against the same database.
//!
//! The library is divided into these sections:
//! 1. Pure logic: the [`pricing`] engine, the order lifecycle table in [`order_flow`], audit chain hashing in
//!    [`audit_chain`] and [`leader`] election.
//! 2. Storage. The backend contracts live in [`traits`]; SQLite and Postgres implementations are provided. You should
//!    not need to access the database directly. The exception is the data types in [`db_types`].
//! 3. The public API ([`mod@spe_api`]): order flow, webhook ingestion, promo ledger and audit chains.
//!
//! The engine also publishes events (see [`events`]) after order status changes commit, so that notification
//! senders can hook in without touching the order tables.
mod db;

pub mod audit_chain;
pub mod db_types;
pub mod events;
pub mod helpers;
pub mod leader;
pub mod order_flow;
pub mod pricing;
pub mod spe_api;
pub mod traits;

#[cfg(any(feature = "test_utils", test))]
pub mod test_utils;

#[cfg(feature = "postgres")]
pub use db::postgres::{PostgresDatabase, PostgresLeaderLock};
#[cfg(feature = "sqlite")]
pub use db::sqlite::SqliteDatabase;
pub use spe_api::{
    AuditApi,
    AuditError,
    AuditSettings,
    CheckoutRequest,
    ExpiryResult,
    LeaderError,
    OrderFlowApi,
    OrderFlowError,
    OrderFlowSettings,
    PaymentEffect,
    RetryPolicy,
    TransitionOutcome,
    WebhookApi,
    WebhookError,
    WebhookNotification,
    WebhookOutcome,
};
pub use traits::{Clock, PaymentStore, StoreError, SystemClock};
