use std::fmt::Debug;

use log::*;
use sqlx::{pool::PoolConnection, PgPool, Postgres};

use super::new_pool;
use crate::traits::{LeaderGuard, LeaderLock, StoreError};

/// Session-level advisory locks on a small pool kept apart from the main one.
///
/// A held lock pins its connection for as long as the leader runs, so the main pool is never starved by elections.
#[derive(Clone)]
pub struct PostgresLeaderLock {
    pool: PgPool,
}

impl Debug for PostgresLeaderLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PostgresLeaderLock ({} connections)", self.pool.size())
    }
}

impl PostgresLeaderLock {
    pub async fn new_with_url(url: &str, pool_size: u32) -> Result<Self, StoreError> {
        let pool = new_pool(url, pool_size).await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl LeaderLock for PostgresLeaderLock {
    type Guard = PostgresLeaderGuard;

    fn supports_advisory_locks(&self) -> bool {
        true
    }

    async fn try_acquire(&self, lock_id: i64) -> Result<Option<PostgresLeaderGuard>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        let acquired =
            sqlx::query_scalar::<_, bool>("SELECT pg_try_advisory_lock($1)").bind(lock_id).fetch_one(&mut *conn).await?;
        if acquired {
            trace!("👑️ Advisory lock {lock_id} taken");
            Ok(Some(PostgresLeaderGuard { lock_id, conn: Some(conn) }))
        } else {
            Ok(None)
        }
    }
}

/// Holds the connection the advisory lock was taken on.
///
/// Dropping the guard without calling `release` detaches and closes that connection instead of returning it to the
/// pool, which ends the session and frees the lock server-side.
pub struct PostgresLeaderGuard {
    lock_id: i64,
    conn: Option<PoolConnection<Postgres>>,
}

impl LeaderGuard for PostgresLeaderGuard {
    fn lock_id(&self) -> i64 {
        self.lock_id
    }

    async fn release(mut self) -> Result<(), StoreError> {
        let Some(mut conn) = self.conn.take() else {
            return Ok(());
        };
        let released = sqlx::query_scalar::<_, bool>("SELECT pg_advisory_unlock($1)")
            .bind(self.lock_id)
            .fetch_one(&mut *conn)
            .await;
        match released {
            Ok(true) => {
                trace!("👑️ Advisory lock {} released", self.lock_id);
                Ok(())
            },
            Ok(false) => {
                warn!("👑️ Advisory lock {} was not held by this session at release time", self.lock_id);
                drop(conn.detach());
                Ok(())
            },
            Err(e) => {
                drop(conn.detach());
                Err(e.into())
            },
        }
    }
}

impl Drop for PostgresLeaderGuard {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            debug!("👑️ Leader guard for lock {} dropped without release. Closing its session.", self.lock_id);
            drop(conn.detach());
        }
    }
}
