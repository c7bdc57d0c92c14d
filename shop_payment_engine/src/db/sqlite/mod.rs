//! SQLite backend.
//!
//! Used for tests and single-node deployments. SQLite has no row-level locks, so the `lock_*` operations write to the
//! target row first, which takes the database write lock for the rest of the transaction. It also has no advisory
//! locks, so leader election is skipped (see [`crate::traits::NoAdvisoryLocks`]).
pub mod db;

pub mod audit;
pub mod order_events;
pub mod orders;
pub mod promos;
pub mod webhooks;

use std::{str::FromStr, time::Duration};

pub use db::{SqliteDatabase, SqliteTransaction};
use log::info;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};

use crate::traits::StoreError;

const SQLITE_BUSY_TIMEOUT: Duration = Duration::from_secs(10);

pub async fn new_pool(url: &str, max_connections: u32) -> Result<SqlitePool, StoreError> {
    let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true).busy_timeout(SQLITE_BUSY_TIMEOUT);
    let pool = SqlitePoolOptions::new().max_connections(max_connections).connect_with(options).await?;
    info!("🗃️ Connected to SQLite database at {url}");
    Ok(pool)
}
