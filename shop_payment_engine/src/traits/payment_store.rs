use std::future::Future;

use chrono::{DateTime, Utc};

use super::StoreError;
use crate::db_types::{
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
};

/// The pool-level handle to a payment engine backend.
///
/// Methods on this trait run outside any caller-visible transaction. Anything that has to be atomic with other writes
/// lives on [`StoreTransaction`] instead.
pub trait PaymentStore: Clone + Send + Sync + 'static {
    type Tx: StoreTransaction;

    /// The URL of the database
    fn url(&self) -> &str;

    /// Opens a new unit of work.
    fn begin(&self) -> impl Future<Output = Result<Self::Tx, StoreError>> + Send;

    fn fetch_order(&self, id: &OrderId) -> impl Future<Output = Result<Option<Order>, StoreError>> + Send;

    fn fetch_order_by_reference_code(
        &self,
        reference_code: &str,
    ) -> impl Future<Output = Result<Option<Order>, StoreError>> + Send;

    /// The order's event log, in insertion order.
    fn fetch_order_events(&self, id: &OrderId) -> impl Future<Output = Result<Vec<OrderEvent>, StoreError>> + Send;

    /// Orders still in `pending_payment` that were created before `cutoff`, oldest first (ties broken by id).
    ///
    /// `after` is the `(created_at, id)` of the last order of the previous page; only orders after it are returned.
    fn fetch_stale_pending_orders(
        &self,
        cutoff: DateTime<Utc>,
        after: Option<(DateTime<Utc>, OrderId)>,
        limit: i64,
    ) -> impl Future<Output = Result<Vec<Order>, StoreError>> + Send;

    fn fetch_promo_code(&self, code: &str) -> impl Future<Output = Result<Option<PromoCode>, StoreError>> + Send;

    /// Administrative insert. Promo editing proper is handled outside the engine.
    fn insert_promo_code(&self, promo: &NewPromoCode) -> impl Future<Output = Result<PromoCode, StoreError>> + Send;

    fn fetch_webhook_event(
        &self,
        provider: WebhookProvider,
        event_id: &str,
    ) -> impl Future<Output = Result<Option<WebhookEvent>, StoreError>> + Send;

    /// Records one delivery of a webhook notification in a single statement.
    ///
    /// The first delivery inserts the dedup row with `attempts = 1`. Every redelivery increments `attempts` and sets
    /// `last_attempt_at`. The stored payload and event type are those of the first delivery. The row as it stands
    /// after the upsert is returned.
    fn record_webhook_attempt(
        &self,
        provider: WebhookProvider,
        event: &NewWebhookEvent,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<WebhookEvent, StoreError>> + Send;

    /// Stores the reason the last attempt failed. Leaves `processed_at` untouched.
    fn record_webhook_error(
        &self,
        provider: WebhookProvider,
        event_id: &str,
        error: &str,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Unprocessed events that have been attempted fewer than `max_attempts` times, least recently attempted first.
    /// The order is stable, so `offset` pages through them.
    fn fetch_unprocessed_webhook_events(
        &self,
        provider: WebhookProvider,
        max_attempts: i64,
        limit: i64,
        offset: i64,
    ) -> impl Future<Output = Result<Vec<WebhookEvent>, StoreError>> + Send;

    /// The chain's entries in insertion order.
    fn fetch_audit_entries(&self, chain: AuditChain) -> impl Future<Output = Result<Vec<AuditEntry>, StoreError>> + Send;

    /// The chain's state row, or `None` if nothing has ever been chained.
    fn fetch_chain_state(&self, chain: AuditChain) -> impl Future<Output = Result<Option<ChainState>, StoreError>> + Send;

    /// Closes the database connection.
    fn close(&mut self) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// A single atomic unit of work against the store.
///
/// Row locks taken through the `lock_*` methods are held until the transaction ends. Locks are always taken in the
/// order: webhook dedup row, order row, promo row, chain state row.
pub trait StoreTransaction: Send + Sized {
    /// Locks and returns the order row.
    fn lock_order(&mut self, id: &OrderId) -> impl Future<Output = Result<Option<Order>, StoreError>> + Send;

    /// Locks and returns the order linked to a provider's session/intent/transaction id.
    fn lock_order_by_provider_reference(
        &mut self,
        method: PaymentMethod,
        reference: &str,
    ) -> impl Future<Output = Result<Option<Order>, StoreError>> + Send;

    fn insert_order(&mut self, order: &NewOrder) -> impl Future<Output = Result<Order, StoreError>> + Send;

    /// Sets the status. `cancel_reason` is only written when the column is still empty.
    fn update_order_status(
        &mut self,
        id: &OrderId,
        status: OrderStatusType,
        cancel_reason: Option<&str>,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<Order, StoreError>> + Send;

    fn increment_payment_retry_count(
        &mut self,
        id: &OrderId,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<Order, StoreError>> + Send;

    /// Links the provider reference to the order. Fails with [`StoreError::NotFound`] if the order already has one.
    fn set_provider_reference(
        &mut self,
        id: &OrderId,
        reference: &str,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<Order, StoreError>> + Send;

    fn insert_order_event(
        &mut self,
        event: &NewOrderEvent,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<OrderEvent, StoreError>> + Send;

    fn order_event_exists(
        &mut self,
        id: &OrderId,
        kind: OrderEventKind,
    ) -> impl Future<Output = Result<bool, StoreError>> + Send;

    fn lock_promo_code(&mut self, code: &str) -> impl Future<Output = Result<Option<PromoCode>, StoreError>> + Send;

    fn increment_promo_usage(&mut self, code: &str) -> impl Future<Output = Result<PromoCode, StoreError>> + Send;

    fn lock_webhook_event(
        &mut self,
        provider: WebhookProvider,
        event_id: &str,
    ) -> impl Future<Output = Result<Option<WebhookEvent>, StoreError>> + Send;

    /// Sets `processed_at` and clears `last_error`. Only ever succeeds once per event.
    fn mark_webhook_processed(
        &mut self,
        provider: WebhookProvider,
        event_id: &str,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Locks the chain state row, creating it with an empty tail if it does not exist yet.
    fn lock_chain_state(
        &mut self,
        chain: AuditChain,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<ChainState, StoreError>> + Send;

    fn update_chain_tail(
        &mut self,
        chain: AuditChain,
        tail_hash: &str,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    fn insert_audit_entry(
        &mut self,
        chain: AuditChain,
        record: &AuditRecord,
    ) -> impl Future<Output = Result<AuditEntry, StoreError>> + Send;

    fn commit(self) -> impl Future<Output = Result<(), StoreError>> + Send;
}
