//! Leader election for periodic jobs.
//!
//! Each job gets a namespaced lock name, which is hashed into the 64-bit advisory lock id space. Across any number of
//! replicas racing for the same name, at most one runs the job's work at a time. If the leader dies, its session closes,
//! the store drops the lock and another replica takes over within one retry interval.
use std::{collections::HashSet, fmt::Display, future::Future, time::Duration};

use blake2::{Blake2b512, Digest};
use log::*;
use tokio_util::sync::CancellationToken;

use crate::{
    spe_api::LeaderError,
    traits::{LeaderGuard, LeaderLock},
};

/// Derives the advisory lock id for a lock name: the first 8 bytes of BLAKE2b-512, big endian.
pub fn advisory_lock_id(name: &str) -> i64 {
    let digest = Blake2b512::digest(name.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(bytes)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LeaderLockName(String);

impl LeaderLockName {
    pub fn new(namespace: &str, job: &str) -> Self {
        Self(format!("{namespace}:{job}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn lock_id(&self) -> i64 {
        advisory_lock_id(&self.0)
    }
}

impl Display for LeaderLockName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hands out lock names and refuses to hand out the same one twice.
///
/// Two jobs sharing a name would block each other forever, so a collision is a configuration error.
#[derive(Debug, Default)]
pub struct LockNameRegistry {
    names: HashSet<String>,
    ids: HashSet<i64>,
}

impl LockNameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, namespace: &str, job: &str) -> Result<LeaderLockName, LeaderError> {
        let name = LeaderLockName::new(namespace, job);
        if self.names.contains(name.as_str()) {
            return Err(LeaderError::DuplicateLockName(name.to_string()));
        }
        if !self.ids.insert(name.lock_id()) {
            return Err(LeaderError::LockIdCollision(name.to_string()));
        }
        self.names.insert(name.to_string());
        Ok(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkOutcome {
    Completed,
    /// The work task panicked. The panic does not escape `run_as_leader`.
    Panicked,
    /// The stop signal fired while the work was running.
    Interrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaderRun {
    /// The work ran. `elected` is false when the store has no advisory locks and election was skipped.
    Finished { elected: bool, outcome: WorkOutcome },
    /// The stop signal fired before the lock was acquired. The work never ran.
    Stopped,
}

/// Runs `work` once this process holds the lock called `name`.
///
/// Until the lock is acquired, retries every `retry_interval`. Errors while acquiring are treated as "not acquired".
/// The work gets a child of `stop` and runs on its own task. The lock is released whatever way the work ends.
pub async fn run_as_leader<L, F, Fut>(
    lock: &L,
    name: &LeaderLockName,
    retry_interval: Duration,
    stop: CancellationToken,
    work: F,
) -> LeaderRun
where
    L: LeaderLock,
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    if !lock.supports_advisory_locks() {
        debug!("👑️ Store has no advisory locks. Running {name} without election.");
        let outcome = run_work(name, &stop, work).await;
        return LeaderRun::Finished { elected: false, outcome };
    }
    let lock_id = name.lock_id();
    let guard = loop {
        if stop.is_cancelled() {
            return LeaderRun::Stopped;
        }
        match lock.try_acquire(lock_id).await {
            Ok(Some(guard)) => break guard,
            Ok(None) => trace!("👑️ {name} is held by another replica"),
            Err(e) => warn!("👑️ Could not try to acquire {name}. Treating it as held elsewhere. {e}"),
        }
        tokio::select! {
            _ = stop.cancelled() => return LeaderRun::Stopped,
            _ = tokio::time::sleep(retry_interval) => {},
        }
    };
    info!("👑️ This replica is now the leader for {name}");
    let outcome = run_work(name, &stop, work).await;
    match guard.release().await {
        Ok(()) => info!("👑️ Released leadership of {name}"),
        Err(e) => warn!("👑️ Releasing {name} failed. The session was closed instead. {e}"),
    }
    LeaderRun::Finished { elected: true, outcome }
}

async fn run_work<F, Fut>(name: &LeaderLockName, stop: &CancellationToken, work: F) -> WorkOutcome
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = ()> + Send + 'static,
{
    let token = stop.child_token();
    let mut handle = tokio::spawn(work(token.clone()));
    let finished = tokio::select! {
        result = &mut handle => Some(result),
        _ = stop.cancelled() => None,
    };
    match finished {
        Some(Ok(())) => WorkOutcome::Completed,
        Some(Err(e)) => {
            error!("👑️ Work for {name} panicked: {e}");
            WorkOutcome::Panicked
        },
        None => {
            token.cancel();
            handle.abort();
            // The lock must not be released while the work could still be running
            let _ = handle.await;
            debug!("👑️ Work for {name} interrupted by the stop signal");
            WorkOutcome::Interrupted
        },
    }
}
