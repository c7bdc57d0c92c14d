use chrono::{DateTime, Utc};
use log::trace;
use sqlx::SqliteConnection;

use crate::{
    db::common::{
        mark_webhook_processed_sql,
        record_webhook_attempt_sql,
        record_webhook_error_sql,
        select_webhook_sql,
        unprocessed_webhooks_sql,
    },
    db_types::{NewWebhookEvent, WebhookEvent, WebhookProvider},
    traits::StoreError,
};

pub async fn record_webhook_attempt(
    provider: WebhookProvider,
    event: &NewWebhookEvent,
    at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<WebhookEvent, StoreError> {
    let row = sqlx::query_as::<_, WebhookEvent>(&record_webhook_attempt_sql(provider))
        .bind(&event.event_id)
        .bind(&event.event_type)
        .bind(at)
        .bind(at)
        .bind(&event.payload)
        .fetch_one(conn)
        .await?;
    trace!("🗃️ {provider} event {} seen {} time(s)", row.event_id, row.attempts);
    Ok(row)
}

pub async fn record_webhook_error(
    provider: WebhookProvider,
    event_id: &str,
    error: &str,
    conn: &mut SqliteConnection,
) -> Result<(), StoreError> {
    sqlx::query(&record_webhook_error_sql(provider)).bind(error).bind(event_id).execute(conn).await?;
    Ok(())
}

pub async fn fetch_webhook_event(
    provider: WebhookProvider,
    event_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<WebhookEvent>, StoreError> {
    let row =
        sqlx::query_as::<_, WebhookEvent>(&select_webhook_sql(provider)).bind(event_id).fetch_optional(conn).await?;
    Ok(row)
}

pub async fn lock_webhook_event(
    provider: WebhookProvider,
    event_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<WebhookEvent>, StoreError> {
    let touch = format!("UPDATE {} SET event_id = event_id WHERE event_id = $1", provider.table_name());
    sqlx::query(&touch).bind(event_id).execute(&mut *conn).await?;
    fetch_webhook_event(provider, event_id, conn).await
}

pub async fn mark_webhook_processed(
    provider: WebhookProvider,
    event_id: &str,
    at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<(), StoreError> {
    let result = sqlx::query(&mark_webhook_processed_sql(provider)).bind(at).bind(event_id).execute(conn).await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound(format!("Unprocessed {provider} event {event_id}")));
    }
    Ok(())
}

pub async fn fetch_unprocessed_webhook_events(
    provider: WebhookProvider,
    max_attempts: i64,
    limit: i64,
    offset: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<WebhookEvent>, StoreError> {
    let rows = sqlx::query_as::<_, WebhookEvent>(&unprocessed_webhooks_sql(provider))
        .bind(max_attempts)
        .bind(limit)
        .bind(offset)
        .fetch_all(conn)
        .await?;
    Ok(rows)
}
