//! Leader election against a real Postgres server. Skipped unless `SPG_TEST_POSTGRES_URL` is set.
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use log::*;
use shop_payment_engine::{
    leader::{run_as_leader, LeaderRun, LockNameRegistry, WorkOutcome},
    PostgresLeaderLock,
};
use tokio_util::sync::CancellationToken;

fn postgres_url() -> Option<String> {
    dotenvy::from_filename(".env.test").ok();
    let _ = env_logger::try_init();
    let url = std::env::var("SPG_TEST_POSTGRES_URL").ok().filter(|s| !s.trim().is_empty());
    if url.is_none() {
        warn!("🚀️ SPG_TEST_POSTGRES_URL is not set. Skipping Postgres leader election test.");
    }
    url
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn only_one_replica_leads_at_a_time() {
    let Some(url) = postgres_url() else { return };
    let mut registry = LockNameRegistry::new();
    let name = registry.register("spg-test", &format!("leader-race-{}", rand::random::<u32>())).unwrap();
    let running = Arc::new(AtomicUsize::new(0));
    let max_running = Arc::new(AtomicUsize::new(0));
    let completed = Arc::new(AtomicUsize::new(0));

    let mut replicas = Vec::new();
    for _ in 0..4 {
        let lock = PostgresLeaderLock::new_with_url(&url, 2).await.unwrap();
        let name = name.clone();
        let running = running.clone();
        let max_running = max_running.clone();
        let completed = completed.clone();
        replicas.push(tokio::spawn(async move {
            run_as_leader(&lock, &name, Duration::from_millis(20), CancellationToken::new(), move |_stop| async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                max_running.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                completed.fetch_add(1, Ordering::SeqCst);
            })
            .await
        }));
    }
    for replica in replicas {
        let run = replica.await.unwrap();
        assert_eq!(run, LeaderRun::Finished { elected: true, outcome: WorkOutcome::Completed });
    }
    assert_eq!(completed.load(Ordering::SeqCst), 4);
    assert_eq!(max_running.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropped_guard_frees_the_lock() {
    use shop_payment_engine::traits::{LeaderGuard, LeaderLock};
    let Some(url) = postgres_url() else { return };
    let lock_id = shop_payment_engine::leader::advisory_lock_id(&format!("spg-test:drop-{}", rand::random::<u32>()));
    let a = PostgresLeaderLock::new_with_url(&url, 1).await.unwrap();
    let b = PostgresLeaderLock::new_with_url(&url, 1).await.unwrap();
    let guard = a.try_acquire(lock_id).await.unwrap().expect("lock should be free");
    assert!(b.try_acquire(lock_id).await.unwrap().is_none());
    drop(guard);
    // The detached session closes in the background
    let mut reacquired = None;
    for _ in 0..50 {
        if let Some(g) = b.try_acquire(lock_id).await.unwrap() {
            reacquired = Some(g);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let guard = reacquired.expect("lock was not freed after its holder went away");
    assert_eq!(guard.lock_id(), lock_id);
    guard.release().await.unwrap();
}
