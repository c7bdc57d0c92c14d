//! SQL shared by both backends.
//!
//! The statements here only use syntax that SQLite and Postgres agree on (`$n` placeholders, `ON CONFLICT`,
//! `RETURNING`). Row locking is the one place where the backends differ, so those statements live with each backend.
//! Per-provider and per-chain table names come from [`WebhookProvider::table_name`] and [`AuditChain::table_name`],
//! never from user input.
use crate::db_types::{AuditChain, WebhookProvider};

pub const ORDER_COLUMNS: &str = "id, reference_code, customer_id, currency, subtotal, discount, shipping_amount, \
                                 fee_amount, tax_amount, total_amount, shipping_method, status, payment_method, \
                                 provider_reference, promo_code, payment_retry_count, cancel_reason, created_at, \
                                 updated_at";

pub const ORDER_EVENT_COLUMNS: &str = "id, order_id, kind, payload, created_at";

pub const PROMO_COLUMNS: &str =
    "code, discount_type, discount_value, currency, expires_at, max_uses, times_used, active";

pub const WEBHOOK_COLUMNS: &str =
    "event_id, event_type, first_seen_at, attempts, last_attempt_at, processed_at, last_error, payload";

pub const AUDIT_COLUMNS: &str = "id, action, actor, subject, payload, created_at, prev_hash, hash";

pub fn insert_order_sql() -> String {
    format!(
        r#"
        INSERT INTO orders (
            id, reference_code, customer_id, currency, subtotal, discount, shipping_amount, fee_amount, tax_amount,
            total_amount, shipping_method, status, payment_method, provider_reference, promo_code,
            payment_retry_count, cancel_reason, created_at, updated_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, 0, NULL, $16, $17)
        RETURNING {ORDER_COLUMNS}
        "#
    )
}

pub fn select_order_sql(filter: &str) -> String {
    format!("SELECT {ORDER_COLUMNS} FROM orders WHERE {filter}")
}

pub fn update_order_status_sql() -> String {
    format!(
        "UPDATE orders SET status = $1, cancel_reason = COALESCE(cancel_reason, $2), updated_at = $3 WHERE id = $4 \
         RETURNING {ORDER_COLUMNS}"
    )
}

pub fn increment_retry_sql() -> String {
    format!(
        "UPDATE orders SET payment_retry_count = payment_retry_count + 1, updated_at = $1 WHERE id = $2 RETURNING \
         {ORDER_COLUMNS}"
    )
}

pub fn set_provider_reference_sql() -> String {
    format!(
        "UPDATE orders SET provider_reference = $1, updated_at = $2 WHERE id = $3 AND provider_reference IS NULL \
         RETURNING {ORDER_COLUMNS}"
    )
}

pub fn stale_pending_orders_sql() -> String {
    format!(
        "SELECT {ORDER_COLUMNS} FROM orders WHERE status = 'pending_payment' AND created_at < $1 AND ($2 IS NULL OR \
         created_at > $2 OR (created_at = $2 AND id > $3)) ORDER BY created_at ASC, id ASC LIMIT $4"
    )
}

pub fn insert_order_event_sql() -> String {
    format!(
        "INSERT INTO order_events (order_id, kind, payload, created_at) VALUES ($1, $2, $3, $4) RETURNING \
         {ORDER_EVENT_COLUMNS}"
    )
}

pub fn order_events_sql() -> String {
    format!("SELECT {ORDER_EVENT_COLUMNS} FROM order_events WHERE order_id = $1 ORDER BY id ASC")
}

pub const ORDER_EVENT_EXISTS_SQL: &str =
    "SELECT EXISTS (SELECT 1 FROM order_events WHERE order_id = $1 AND kind = $2)";

pub fn select_promo_sql() -> String {
    format!("SELECT {PROMO_COLUMNS} FROM promo_codes WHERE code = $1")
}

pub fn insert_promo_sql() -> String {
    format!(
        "INSERT INTO promo_codes (code, discount_type, discount_value, currency, expires_at, max_uses, times_used, \
         active) VALUES ($1, $2, $3, $4, $5, $6, 0, $7) RETURNING {PROMO_COLUMNS}"
    )
}

pub fn increment_promo_sql() -> String {
    format!("UPDATE promo_codes SET times_used = times_used + 1 WHERE code = $1 RETURNING {PROMO_COLUMNS}")
}

pub fn record_webhook_attempt_sql(provider: WebhookProvider) -> String {
    let table = provider.table_name();
    format!(
        r#"
        INSERT INTO {table} (event_id, event_type, first_seen_at, attempts, last_attempt_at, payload)
        VALUES ($1, $2, $3, 1, $4, $5)
        ON CONFLICT (event_id) DO UPDATE SET
            attempts = {table}.attempts + 1,
            last_attempt_at = excluded.last_attempt_at
        RETURNING {WEBHOOK_COLUMNS}
        "#
    )
}

pub fn record_webhook_error_sql(provider: WebhookProvider) -> String {
    format!("UPDATE {} SET last_error = $1 WHERE event_id = $2", provider.table_name())
}

pub fn select_webhook_sql(provider: WebhookProvider) -> String {
    format!("SELECT {WEBHOOK_COLUMNS} FROM {} WHERE event_id = $1", provider.table_name())
}

pub fn mark_webhook_processed_sql(provider: WebhookProvider) -> String {
    format!(
        "UPDATE {} SET processed_at = $1, last_error = NULL WHERE event_id = $2 AND processed_at IS NULL",
        provider.table_name()
    )
}

pub fn unprocessed_webhooks_sql(provider: WebhookProvider) -> String {
    format!(
        "SELECT {WEBHOOK_COLUMNS} FROM {} WHERE processed_at IS NULL AND attempts < $1 ORDER BY last_attempt_at ASC, \
         event_id ASC LIMIT $2 OFFSET $3",
        provider.table_name()
    )
}

pub const ENSURE_CHAIN_STATE_SQL: &str = "INSERT INTO audit_chain_state (chain_name, tail_hash, updated_at) VALUES \
                                          ($1, NULL, $2) ON CONFLICT (chain_name) DO NOTHING";

pub const UPDATE_CHAIN_TAIL_SQL: &str =
    "UPDATE audit_chain_state SET tail_hash = $1, updated_at = $2 WHERE chain_name = $3";

pub fn insert_audit_entry_sql(chain: AuditChain) -> String {
    format!(
        "INSERT INTO {} (action, actor, subject, payload, created_at, prev_hash, hash) VALUES ($1, $2, $3, $4, $5, \
         $6, $7) RETURNING {AUDIT_COLUMNS}",
        chain.table_name()
    )
}

pub fn audit_entries_sql(chain: AuditChain) -> String {
    format!("SELECT {AUDIT_COLUMNS} FROM {} ORDER BY id ASC", chain.table_name())
}
