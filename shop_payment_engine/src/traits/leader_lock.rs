use std::future::Future;

use super::StoreError;

/// A store-backed, named mutual exclusion lock that lives as long as the connection that took it.
///
/// If the process holding a lock dies, its connection closes and the store releases the lock, so another replica can
/// take over.
pub trait LeaderLock: Send + Sync + 'static {
    type Guard: LeaderGuard;

    /// Backends without advisory locks (e.g. SQLite) return `false`. Callers then skip election altogether.
    fn supports_advisory_locks(&self) -> bool;

    /// Non-blocking attempt to take the lock. `Ok(None)` means another session holds it.
    fn try_acquire(&self, lock_id: i64) -> impl Future<Output = Result<Option<Self::Guard>, StoreError>> + Send;
}

/// Proof of lock ownership.
///
/// Implementations must make sure that a guard dropped without [`LeaderGuard::release`] still frees the lock, by
/// closing the underlying connection.
pub trait LeaderGuard: Send + 'static {
    fn lock_id(&self) -> i64;

    fn release(self) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// A guard that can never be constructed.
pub enum NoGuard {}

impl LeaderGuard for NoGuard {
    fn lock_id(&self) -> i64 {
        match *self {}
    }

    async fn release(self) -> Result<(), StoreError> {
        match self {}
    }
}

/// The lock provider for single-node stores. Election is skipped and the work runs directly.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoAdvisoryLocks;

impl LeaderLock for NoAdvisoryLocks {
    type Guard = NoGuard;

    fn supports_advisory_locks(&self) -> bool {
        false
    }

    async fn try_acquire(&self, _lock_id: i64) -> Result<Option<NoGuard>, StoreError> {
        Ok(None)
    }
}
