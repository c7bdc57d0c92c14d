use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::{
    db::common::{audit_entries_sql, insert_audit_entry_sql, ENSURE_CHAIN_STATE_SQL, UPDATE_CHAIN_TAIL_SQL},
    db_types::{AuditChain, AuditEntry, AuditRecord, ChainState},
    traits::StoreError,
};

pub async fn lock_chain_state(
    chain: AuditChain,
    at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<ChainState, StoreError> {
    sqlx::query(ENSURE_CHAIN_STATE_SQL).bind(chain.as_str()).bind(at).execute(&mut *conn).await?;
    sqlx::query("UPDATE audit_chain_state SET chain_name = chain_name WHERE chain_name = $1")
        .bind(chain.as_str())
        .execute(&mut *conn)
        .await?;
    let state = sqlx::query_as::<_, ChainState>(
        "SELECT chain_name, tail_hash, updated_at FROM audit_chain_state WHERE chain_name = $1",
    )
    .bind(chain.as_str())
    .fetch_one(conn)
    .await?;
    Ok(state)
}

pub async fn update_chain_tail(
    chain: AuditChain,
    tail_hash: &str,
    at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<(), StoreError> {
    sqlx::query(UPDATE_CHAIN_TAIL_SQL).bind(tail_hash).bind(at).bind(chain.as_str()).execute(conn).await?;
    Ok(())
}

pub async fn insert_audit_entry(
    chain: AuditChain,
    record: &AuditRecord,
    conn: &mut SqliteConnection,
) -> Result<AuditEntry, StoreError> {
    let entry = sqlx::query_as::<_, AuditEntry>(&insert_audit_entry_sql(chain))
        .bind(&record.action)
        .bind(&record.actor)
        .bind(&record.subject)
        .bind(&record.payload)
        .bind(record.created_at)
        .bind(&record.prev_hash)
        .bind(&record.hash)
        .fetch_one(conn)
        .await?;
    Ok(entry)
}

pub async fn fetch_audit_entries(chain: AuditChain, conn: &mut SqliteConnection) -> Result<Vec<AuditEntry>, StoreError> {
    let entries = sqlx::query_as::<_, AuditEntry>(&audit_entries_sql(chain)).fetch_all(conn).await?;
    Ok(entries)
}

pub async fn fetch_chain_state(chain: AuditChain, conn: &mut SqliteConnection) -> Result<Option<ChainState>, StoreError> {
    let state = sqlx::query_as::<_, ChainState>(
        "SELECT chain_name, tail_hash, updated_at FROM audit_chain_state WHERE chain_name = $1",
    )
    .bind(chain.as_str())
    .fetch_optional(conn)
    .await?;
    Ok(state)
}
