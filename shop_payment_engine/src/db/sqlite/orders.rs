use chrono::{DateTime, Utc};
use log::trace;
use sqlx::SqliteConnection;

use crate::{
    db::common::{
        increment_retry_sql,
        insert_order_sql,
        select_order_sql,
        set_provider_reference_sql,
        stale_pending_orders_sql,
        update_order_status_sql,
    },
    db_types::{NewOrder, Order, OrderId, OrderStatusType, PaymentMethod},
    traits::StoreError,
};

/// Inserts a new order using the given connection. This is not atomic on its own. Embed the call in a transaction and
/// pass `&mut *tx` when the insert has to happen together with other writes.
pub async fn insert_order(order: &NewOrder, conn: &mut SqliteConnection) -> Result<Order, StoreError> {
    let order = sqlx::query_as::<_, Order>(&insert_order_sql())
        .bind(order.id.as_str())
        .bind(&order.reference_code)
        .bind(&order.customer_id)
        .bind(&order.currency)
        .bind(order.subtotal)
        .bind(order.discount)
        .bind(order.shipping_amount)
        .bind(order.fee_amount)
        .bind(order.tax_amount)
        .bind(order.total_amount)
        .bind(&order.shipping_method)
        .bind(order.status.as_str())
        .bind(order.payment_method.as_str())
        .bind(&order.provider_reference)
        .bind(&order.promo_code)
        .bind(order.created_at)
        .bind(order.created_at)
        .fetch_one(conn)
        .await?;
    trace!("🗃️ Order {} ({}) inserted", order.id, order.reference_code);
    Ok(order)
}

pub async fn fetch_order(id: &OrderId, conn: &mut SqliteConnection) -> Result<Option<Order>, StoreError> {
    let order =
        sqlx::query_as::<_, Order>(&select_order_sql("id = $1")).bind(id.as_str()).fetch_optional(conn).await?;
    Ok(order)
}

pub async fn fetch_order_by_reference_code(
    reference_code: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, StoreError> {
    let order = sqlx::query_as::<_, Order>(&select_order_sql("reference_code = $1"))
        .bind(reference_code)
        .fetch_optional(conn)
        .await?;
    Ok(order)
}

/// SQLite has no row locks. Writing to the row takes the database write lock instead, which is held until the
/// transaction ends, so concurrent writers queue up behind the busy timeout.
pub async fn lock_order(id: &OrderId, conn: &mut SqliteConnection) -> Result<Option<Order>, StoreError> {
    sqlx::query("UPDATE orders SET id = id WHERE id = $1").bind(id.as_str()).execute(&mut *conn).await?;
    fetch_order(id, conn).await
}

pub async fn lock_order_by_provider_reference(
    method: PaymentMethod,
    reference: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, StoreError> {
    sqlx::query("UPDATE orders SET id = id WHERE payment_method = $1 AND provider_reference = $2")
        .bind(method.as_str())
        .bind(reference)
        .execute(&mut *conn)
        .await?;
    let order = sqlx::query_as::<_, Order>(&select_order_sql("payment_method = $1 AND provider_reference = $2"))
        .bind(method.as_str())
        .bind(reference)
        .fetch_optional(conn)
        .await?;
    Ok(order)
}

pub async fn update_order_status(
    id: &OrderId,
    status: OrderStatusType,
    cancel_reason: Option<&str>,
    at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Order, StoreError> {
    sqlx::query_as::<_, Order>(&update_order_status_sql())
        .bind(status.as_str())
        .bind(cancel_reason)
        .bind(at)
        .bind(id.as_str())
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("Order {id}")))
}

pub async fn increment_payment_retry_count(
    id: &OrderId,
    at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Order, StoreError> {
    sqlx::query_as::<_, Order>(&increment_retry_sql())
        .bind(at)
        .bind(id.as_str())
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("Order {id}")))
}

pub async fn set_provider_reference(
    id: &OrderId,
    reference: &str,
    at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Order, StoreError> {
    sqlx::query_as::<_, Order>(&set_provider_reference_sql())
        .bind(reference)
        .bind(at)
        .bind(id.as_str())
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("Order {id} without a provider reference")))
}

pub async fn fetch_stale_pending_orders(
    cutoff: DateTime<Utc>,
    after: Option<(DateTime<Utc>, OrderId)>,
    limit: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<Order>, StoreError> {
    let (after_created_at, after_id) = after.unzip();
    let orders = sqlx::query_as::<_, Order>(&stale_pending_orders_sql())
        .bind(cutoff)
        .bind(after_created_at)
        .bind(after_id)
        .bind(limit)
        .fetch_all(conn)
        .await?;
    trace!("🗃️ {} stale pending orders found", orders.len());
    Ok(orders)
}
