use std::fmt::Debug;

use chrono::{DateTime, Utc};
use log::*;
use sqlx::{migrate, Sqlite, SqlitePool, Transaction};

use super::{audit, new_pool, order_events, orders, promos, webhooks};
use crate::{
    db_types::{
        AuditChain,
        AuditEntry,
        AuditRecord,
        ChainState,
        NewOrder,
        NewOrderEvent,
        NewPromoCode,
        NewWebhookEvent,
        Order,
        OrderEvent,
        OrderEventKind,
        OrderId,
        OrderStatusType,
        PaymentMethod,
        PromoCode,
        WebhookEvent,
        WebhookProvider,
    },
    traits::{PaymentStore, StoreError, StoreTransaction},
};

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SqliteDatabase ({})", self.url)
    }
}

impl SqliteDatabase {
    /// Creates a new database API object
    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = new_pool(url, max_connections).await?;
        Ok(Self { url: url.to_string(), pool })
    }

    /// Brings the schema up to date.
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        migrate!("./src/db/sqlite/migrations").run(&self.pool).await?;
        debug!("🗃️ SQLite migrations complete");
        Ok(())
    }

    /// Returns a reference to the database connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl PaymentStore for SqliteDatabase {
    type Tx = SqliteTransaction;

    fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn begin(&self) -> Result<SqliteTransaction, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(SqliteTransaction { tx })
    }

    async fn fetch_order(&self, id: &OrderId) -> Result<Option<Order>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        orders::fetch_order(id, &mut conn).await
    }

    async fn fetch_order_by_reference_code(&self, reference_code: &str) -> Result<Option<Order>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        orders::fetch_order_by_reference_code(reference_code, &mut conn).await
    }

    async fn fetch_order_events(&self, id: &OrderId) -> Result<Vec<OrderEvent>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        order_events::fetch_order_events(id, &mut conn).await
    }

    async fn fetch_stale_pending_orders(
        &self,
        cutoff: DateTime<Utc>,
        after: Option<(DateTime<Utc>, OrderId)>,
        limit: i64,
    ) -> Result<Vec<Order>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        orders::fetch_stale_pending_orders(cutoff, after, limit, &mut conn).await
    }

    async fn fetch_promo_code(&self, code: &str) -> Result<Option<PromoCode>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        promos::fetch_promo_code(code, &mut conn).await
    }

    async fn insert_promo_code(&self, promo: &NewPromoCode) -> Result<PromoCode, StoreError> {
        let mut conn = self.pool.acquire().await?;
        promos::insert_promo_code(promo, &mut conn).await
    }

    async fn fetch_webhook_event(
        &self,
        provider: WebhookProvider,
        event_id: &str,
    ) -> Result<Option<WebhookEvent>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        webhooks::fetch_webhook_event(provider, event_id, &mut conn).await
    }

    async fn record_webhook_attempt(
        &self,
        provider: WebhookProvider,
        event: &NewWebhookEvent,
        at: DateTime<Utc>,
    ) -> Result<WebhookEvent, StoreError> {
        let mut conn = self.pool.acquire().await?;
        webhooks::record_webhook_attempt(provider, event, at, &mut conn).await
    }

    async fn record_webhook_error(
        &self,
        provider: WebhookProvider,
        event_id: &str,
        error: &str,
    ) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        webhooks::record_webhook_error(provider, event_id, error, &mut conn).await
    }

    async fn fetch_unprocessed_webhook_events(
        &self,
        provider: WebhookProvider,
        max_attempts: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WebhookEvent>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        webhooks::fetch_unprocessed_webhook_events(provider, max_attempts, limit, offset, &mut conn).await
    }

    async fn fetch_audit_entries(&self, chain: AuditChain) -> Result<Vec<AuditEntry>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        audit::fetch_audit_entries(chain, &mut conn).await
    }

    async fn fetch_chain_state(&self, chain: AuditChain) -> Result<Option<ChainState>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        audit::fetch_chain_state(chain, &mut conn).await
    }

    async fn close(&mut self) -> Result<(), StoreError> {
        self.pool.close().await;
        Ok(())
    }
}

/// A unit of work on the SQLite backend. Rolls back when dropped without a commit.
pub struct SqliteTransaction {
    tx: Transaction<'static, Sqlite>,
}

impl StoreTransaction for SqliteTransaction {
    async fn lock_order(&mut self, id: &OrderId) -> Result<Option<Order>, StoreError> {
        orders::lock_order(id, &mut self.tx).await
    }

    async fn lock_order_by_provider_reference(
        &mut self,
        method: PaymentMethod,
        reference: &str,
    ) -> Result<Option<Order>, StoreError> {
        orders::lock_order_by_provider_reference(method, reference, &mut self.tx).await
    }

    async fn insert_order(&mut self, order: &NewOrder) -> Result<Order, StoreError> {
        orders::insert_order(order, &mut self.tx).await
    }

    async fn update_order_status(
        &mut self,
        id: &OrderId,
        status: OrderStatusType,
        cancel_reason: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<Order, StoreError> {
        orders::update_order_status(id, status, cancel_reason, at, &mut self.tx).await
    }

    async fn increment_payment_retry_count(&mut self, id: &OrderId, at: DateTime<Utc>) -> Result<Order, StoreError> {
        orders::increment_payment_retry_count(id, at, &mut self.tx).await
    }

    async fn set_provider_reference(
        &mut self,
        id: &OrderId,
        reference: &str,
        at: DateTime<Utc>,
    ) -> Result<Order, StoreError> {
        orders::set_provider_reference(id, reference, at, &mut self.tx).await
    }

    async fn insert_order_event(&mut self, event: &NewOrderEvent, at: DateTime<Utc>) -> Result<OrderEvent, StoreError> {
        order_events::insert_order_event(event, at, &mut self.tx).await
    }

    async fn order_event_exists(&mut self, id: &OrderId, kind: OrderEventKind) -> Result<bool, StoreError> {
        order_events::order_event_exists(id, kind, &mut self.tx).await
    }

    async fn lock_promo_code(&mut self, code: &str) -> Result<Option<PromoCode>, StoreError> {
        promos::lock_promo_code(code, &mut self.tx).await
    }

    async fn increment_promo_usage(&mut self, code: &str) -> Result<PromoCode, StoreError> {
        promos::increment_promo_usage(code, &mut self.tx).await
    }

    async fn lock_webhook_event(
        &mut self,
        provider: WebhookProvider,
        event_id: &str,
    ) -> Result<Option<WebhookEvent>, StoreError> {
        webhooks::lock_webhook_event(provider, event_id, &mut self.tx).await
    }

    async fn mark_webhook_processed(
        &mut self,
        provider: WebhookProvider,
        event_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        webhooks::mark_webhook_processed(provider, event_id, at, &mut self.tx).await
    }

    async fn lock_chain_state(&mut self, chain: AuditChain, at: DateTime<Utc>) -> Result<ChainState, StoreError> {
        audit::lock_chain_state(chain, at, &mut self.tx).await
    }

    async fn update_chain_tail(&mut self, chain: AuditChain, tail_hash: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        audit::update_chain_tail(chain, tail_hash, at, &mut self.tx).await
    }

    async fn insert_audit_entry(&mut self, chain: AuditChain, record: &AuditRecord) -> Result<AuditEntry, StoreError> {
        audit::insert_audit_entry(chain, record, &mut self.tx).await
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().await?;
        Ok(())
    }
}
