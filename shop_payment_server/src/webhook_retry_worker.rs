//! Re-runs webhook deliveries that failed for a reason worth retrying.
//!
//! Providers redeliver on their own schedule, which can be hours apart. A notification that arrived before its order
//! was linked, or while the database was unavailable, is kept with `processed_at` empty. This worker replays the stored
//! payload of such events with exponential back-off until they are processed or run out of attempts.
use std::sync::Arc;

use log::*;
use shop_payment_engine::{
    db_types::{WebhookEvent, WebhookProvider},
    leader::{run_as_leader, LeaderLockName, LeaderRun, WorkOutcome},
    traits::{LeaderLock, PaymentStore},
    RetryPolicy,
    WebhookApi,
    WebhookOutcome,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::integrations::parse_notification;

/// Starts the retry worker. The returned handle finishes once `stop` is cancelled.
pub fn start_webhook_retry_worker<B, L>(
    api: WebhookApi<B>,
    lock: L,
    lock_name: LeaderLockName,
    policy: RetryPolicy,
    every: std::time::Duration,
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
            let run = run_as_leader(&lock, &lock_name, leader_retry, stop.clone(), move |token| {
                retry_loop(api, policy, every, token)
            })
            .await;
            match run {
                LeaderRun::Stopped | LeaderRun::Finished { outcome: WorkOutcome::Interrupted, .. } => break,
                LeaderRun::Finished { .. } if stop.is_cancelled() => break,
                LeaderRun::Finished { outcome, .. } => {
                    warn!("🕰️ Webhook retry worker ended unexpectedly ({outcome:?}). Restarting it.");
                },
            }
        }
        info!("🕰️ Webhook retry worker stopped");
    })
}

async fn retry_loop<B: PaymentStore>(
    api: Arc<WebhookApi<B>>,
    policy: RetryPolicy,
    every: std::time::Duration,
    stop: CancellationToken,
) {
    let mut timer = tokio::time::interval(every);
    info!("🕰️ Webhook retry worker started");
    loop {
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = timer.tick() => {},
        }
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = retry_due_events(api.as_ref(), &policy) => {},
        }
    }
}

/// Replays every due event once. Returns the number of events that were processed on this pass.
pub async fn retry_due_events<B: PaymentStore>(api: &WebhookApi<B>, policy: &RetryPolicy) -> usize {
    let mut processed = 0;
    for provider in WebhookProvider::ALL {
        let candidates = match api.retry_candidates(provider, policy).await {
            Ok(c) => c,
            Err(e) => {
                error!("🕰️ Could not fetch {provider} webhook retry candidates. {e}");
                continue;
            },
        };
        if !candidates.is_empty() {
            debug!("🕰️ Retrying {} {provider} webhook events", candidates.len());
        }
        for event in candidates {
            if retry_event(api, provider, &event).await {
                processed += 1;
            }
        }
    }
    processed
}

async fn retry_event<B: PaymentStore>(api: &WebhookApi<B>, provider: WebhookProvider, event: &WebhookEvent) -> bool {
    let notification = match parse_notification(provider, event.payload.as_bytes()) {
        Ok(n) => n,
        Err(e) => {
            warn!("🕰️ Stored {provider} event {} can no longer be parsed. {e}", event.event_id);
            return false;
        },
    };
    match api.process(provider, &notification).await {
        Ok(WebhookOutcome::Rejected(reason)) => {
            info!("🕰️ Retried {provider} event {} was rejected. {reason}", event.event_id);
            false
        },
        Ok(outcome) => {
            info!("🕰️ Retried {provider} event {} on attempt #{}: {outcome:?}", event.event_id, event.attempts + 1);
            true
        },
        Err(e) => {
            debug!("🕰️ {provider} event {} still failing after {} attempts. {e}", event.event_id, event.attempts + 1);
            false
        },
    }
}
