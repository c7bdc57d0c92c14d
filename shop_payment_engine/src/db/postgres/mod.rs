//! Postgres backend.
//!
//! The production store. Row locks are `SELECT ... FOR UPDATE` and leader election uses session-level advisory locks
//! (see [`PostgresLeaderLock`]).
pub mod db;

pub mod audit;
pub mod leader_lock;
pub mod order_events;
pub mod orders;
pub mod promos;
pub mod webhooks;

pub use db::{PostgresDatabase, PostgresTransaction};
pub use leader_lock::{PostgresLeaderGuard, PostgresLeaderLock};
use log::info;
use sqlx::{postgres::PgPoolOptions, PgPool};

use crate::traits::StoreError;

pub async fn new_pool(url: &str, max_connections: u32) -> Result<PgPool, StoreError> {
    let pool = PgPoolOptions::new().max_connections(max_connections).connect(url).await?;
    info!("🗃️ Connected to Postgres database ({max_connections} connections max)");
    Ok(pool)
}
