use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::{
    db::common::{insert_order_event_sql, order_events_sql, ORDER_EVENT_EXISTS_SQL},
    db_types::{NewOrderEvent, OrderEvent, OrderEventKind, OrderId},
    traits::StoreError,
};

/// Appends to the order's event log. The table rejects updates and deletes.
pub async fn insert_order_event(
    event: &NewOrderEvent,
    at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<OrderEvent, StoreError> {
    let payload = serde_json::to_string(&event.payload).map_err(|e| StoreError::DecodeError(e.to_string()))?;
    let event = sqlx::query_as::<_, OrderEvent>(&insert_order_event_sql())
        .bind(event.order_id.as_str())
        .bind(event.kind.as_str())
        .bind(payload)
        .bind(at)
        .fetch_one(conn)
        .await?;
    Ok(event)
}

pub async fn fetch_order_events(id: &OrderId, conn: &mut SqliteConnection) -> Result<Vec<OrderEvent>, StoreError> {
    let events = sqlx::query_as::<_, OrderEvent>(&order_events_sql()).bind(id.as_str()).fetch_all(conn).await?;
    Ok(events)
}

pub async fn order_event_exists(
    id: &OrderId,
    kind: OrderEventKind,
    conn: &mut SqliteConnection,
) -> Result<bool, StoreError> {
    let exists = sqlx::query_scalar::<_, bool>(ORDER_EVENT_EXISTS_SQL)
        .bind(id.as_str())
        .bind(kind.as_str())
        .fetch_one(conn)
        .await?;
    Ok(exists)
}
