use std::sync::Arc;

use chrono::Duration;
use log::*;
use shop_payment_engine::{
    leader::{run_as_leader, LeaderLockName, LeaderRun, WorkOutcome},
    traits::{LeaderLock, PaymentStore},
    ExpiryResult,
    OrderFlowApi,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::ExpiryConfig;

/// Starts the expiry worker. The returned handle finishes once `stop` is cancelled.
///
/// Only the replica holding `lock_name` sweeps. The others wait for the lock, so the sweep keeps running if the
/// current leader dies.
pub fn start_expiry_worker<B, L>(
    api: OrderFlowApi<B>,
    lock: L,
    lock_name: LeaderLockName,
    config: ExpiryConfig,
    leader_retry: std::time::Duration,
    stop: CancellationToken,
) -> JoinHandle<()>
where
    B: PaymentStore,
    L: LeaderLock,
{
    let api = Arc::new(api);
    tokio::spawn(async move {
        loop {
            let api = Arc::clone(&api);
            let ExpiryConfig { payment_ttl, sweep_interval } = config.clone();
            let run = run_as_leader(&lock, &lock_name, leader_retry, stop.clone(), move |token| {
                expiry_loop(api, payment_ttl, sweep_interval, token)
            })
            .await;
            match run {
                LeaderRun::Stopped | LeaderRun::Finished { outcome: WorkOutcome::Interrupted, .. } => break,
                LeaderRun::Finished { .. } if stop.is_cancelled() => break,
                LeaderRun::Finished { outcome, .. } => {
                    warn!("🕰️ Order expiry worker ended unexpectedly ({outcome:?}). Restarting it.");
                },
            }
        }
        info!("🕰️ Order expiry worker stopped");
    })
}

async fn expiry_loop<B: PaymentStore>(
    api: Arc<OrderFlowApi<B>>,
    payment_ttl: Duration,
    every: std::time::Duration,
    stop: CancellationToken,
) {
    let mut timer = tokio::time::interval(every);
    info!("🕰️ Unpaid order expiry worker started");
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = timer.tick() => {},
        }
        debug!("🕰️ Running unpaid order expiry job");
        tokio::select! {
            _ = stop.cancelled() => break,
            result = api.expire_stale_orders(payment_ttl) => match result {
                Ok(result) => log_result(&result),
                Err(e) => error!("🕰️ Error running unpaid order expiry job: {e}"),
            },
        }
    }
}

fn log_result(result: &ExpiryResult) {
    if !result.expired.is_empty() {
        info!("🕰️ {} orders expired", result.expired.len());
        debug!("🕰️ Expired orders: {}", result.expired.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(", "));
    }
    if !result.skipped.is_empty() {
        debug!("🕰️ {} orders were paid or cancelled before they could expire", result.skipped.len());
    }
    for (id, reason) in &result.failed {
        warn!("🕰️ Could not expire order {id}. It will be retried on the next sweep. {reason}");
    }
}
