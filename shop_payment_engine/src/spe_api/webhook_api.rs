//! Idempotent ingestion of payment provider notifications.
//!
//! Providers deliver at least once, in any order, sometimes concurrently. Each provider's own event id is the dedup
//! key. A delivery is recorded first (so that `attempts` counts every delivery, successful or not), and the business
//! effect is then applied in a second transaction that also sets `processed_at`. Once `processed_at` is set, every
//! later delivery of the same event is acknowledged without doing anything.
use std::{fmt::Debug, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use log::*;
use serde::{Deserialize, Serialize};

use super::{
    audit_api::AuditSettings,
    errors::WebhookError,
    order_flow_api::{apply_locked, publish_outcome},
    order_objects::TransitionOutcome,
};
use crate::{
    db_types::{NewWebhookEvent, WebhookEvent, WebhookProvider},
    events::EventProducers,
    order_flow::OrderTransition,
    traits::{Clock, PaymentStore, StoreTransaction},
};

/// The most events one retry sweep picks up per provider.
pub const RETRY_BATCH_SIZE: i64 = 100;

/// What a notification means for an order, once the provider's payload format has been interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum PaymentEffect {
    /// `reference` is the provider session, intent or transaction id the order was linked to.
    PaymentCaptured { reference: String },
    PaymentFailed { reference: String, reason: String },
    Refunded { reference: String },
    /// An event type the engine does not act on. It is still recorded and marked processed.
    Ignored,
}

impl PaymentEffect {
    fn transition(&self) -> Option<(&str, OrderTransition)> {
        match self {
            Self::PaymentCaptured { reference } => Some((reference, OrderTransition::PaymentConfirmed)),
            Self::PaymentFailed { reference, reason } => {
                Some((reference, OrderTransition::PaymentFailed { reason: reason.clone() }))
            },
            Self::Refunded { reference } => Some((reference, OrderTransition::Refund)),
            Self::Ignored => None,
        }
    }
}

/// A verified and parsed provider notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookNotification {
    /// The provider's event id, exactly as received
    pub event_id: String,
    pub event_type: String,
    /// The raw request body
    pub payload: String,
    pub effect: PaymentEffect,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// This delivery applied the event.
    Applied(TransitionOutcome),
    /// The event had already been applied by an earlier or concurrent delivery.
    Duplicate,
    /// The event type is not one the engine acts on. Marked processed.
    Ignored,
    /// The order's state does not allow this event. Nothing changed. The reason is stored in `last_error`.
    Rejected(String),
}

/// Back-off for the internal retry sweep: `delay(n) = min(base * 2^(n-1), max_delay)` after the n-th attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Events that have been attempted this many times are left alone
    pub max_attempts: i64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { base_delay: Duration::seconds(30), max_delay: Duration::hours(1), max_attempts: 10 }
    }
}

impl RetryPolicy {
    pub fn delay(&self, attempts: i64) -> Duration {
        let exponent = attempts.clamp(1, 31) - 1;
        let factor = 1i32.checked_shl(exponent as u32).unwrap_or(i32::MAX);
        self.base_delay.checked_mul(factor).map(|d| d.min(self.max_delay)).unwrap_or(self.max_delay)
    }

    pub fn is_due(&self, event: &WebhookEvent, now: DateTime<Utc>) -> bool {
        !event.is_processed() &&
            event.attempts < self.max_attempts &&
            event.last_attempt_at + self.delay(event.attempts) <= now
    }
}

pub struct WebhookApi<B> {
    db: B,
    audit: AuditSettings,
    clock: Arc<dyn Clock>,
    producers: EventProducers,
}

impl<B> Debug for WebhookApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WebhookApi")
    }
}

impl<B> WebhookApi<B> {
    pub fn new(db: B, audit: AuditSettings, clock: Arc<dyn Clock>) -> Self {
        Self { db, audit, clock, producers: EventProducers::default() }
    }

    pub fn with_producers(mut self, producers: EventProducers) -> Self {
        self.producers = producers;
        self
    }

    pub fn db(&self) -> &B {
        &self.db
    }
}

impl<B> WebhookApi<B>
where B: PaymentStore
{
    /// Records the delivery and applies the notification's effect at most once.
    ///
    /// Errors returned from here are worth retrying (the store was unavailable, the order it refers to is not known
    /// yet). The dedup row keeps `processed_at` empty and stores the error in `last_error`.
    pub async fn process(
        &self,
        provider: WebhookProvider,
        notification: &WebhookNotification,
    ) -> Result<WebhookOutcome, WebhookError> {
        let event_id = notification.event_id.as_str();
        let new_event = NewWebhookEvent {
            event_id: event_id.to_string(),
            event_type: notification.event_type.clone(),
            payload: notification.payload.clone(),
        };
        let row = self.db.record_webhook_attempt(provider, &new_event, self.clock.now()).await?;
        if row.is_processed() {
            debug!("🪝️ {provider} event {event_id} was already processed. Delivery #{} acknowledged.", row.attempts);
            return Ok(WebhookOutcome::Duplicate);
        }
        match self.apply(provider, notification).await {
            Ok(outcome) => {
                if let WebhookOutcome::Applied(transition) = &outcome {
                    publish_outcome(&self.producers, transition, &actor(provider));
                }
                Ok(outcome)
            },
            Err(WebhookError::OrderFlow(e)) if e.is_invalid_transition() => {
                let reason = e.to_string();
                warn!("🪝️ {provider} event {event_id} rejected. {reason}");
                self.db.record_webhook_error(provider, event_id, &reason).await?;
                Ok(WebhookOutcome::Rejected(reason))
            },
            Err(e) => {
                warn!("🪝️ {provider} event {event_id} failed on attempt #{}. {e}", row.attempts);
                if let Err(store_err) = self.db.record_webhook_error(provider, event_id, &e.to_string()).await {
                    error!("🪝️ Could not record the failure of {provider} event {event_id}. {store_err}");
                }
                Err(e)
            },
        }
    }

    async fn apply(
        &self,
        provider: WebhookProvider,
        notification: &WebhookNotification,
    ) -> Result<WebhookOutcome, WebhookError> {
        let event_id = notification.event_id.as_str();
        let mut tx = self.db.begin().await?;
        let event = tx.lock_webhook_event(provider, event_id).await?;
        if event.as_ref().map(WebhookEvent::is_processed).unwrap_or(false) {
            debug!("🪝️ {provider} event {event_id} was applied by a concurrent delivery");
            return Ok(WebhookOutcome::Duplicate);
        }
        let now = self.clock.now();
        let outcome = match notification.effect.transition() {
            None => {
                debug!("🪝️ {provider} event {event_id} ({}) needs no action", notification.event_type);
                WebhookOutcome::Ignored
            },
            Some((reference, transition)) => {
                let order = tx
                    .lock_order_by_provider_reference(provider.payment_method(), reference)
                    .await?
                    .ok_or_else(|| WebhookError::UnknownReference { provider, reference: reference.to_string() })?;
                let outcome = apply_locked(
                    &mut tx,
                    order,
                    &transition,
                    &actor(provider),
                    &self.audit,
                    self.clock.as_ref(),
                    now,
                )
                .await
                .map_err(WebhookError::from)?;
                WebhookOutcome::Applied(outcome)
            },
        };
        tx.mark_webhook_processed(provider, event_id, now).await?;
        tx.commit().await?;
        info!("🪝️ {provider} event {event_id} ({}) processed", notification.event_type);
        Ok(outcome)
    }

    /// Unprocessed events whose back-off has elapsed, least recently attempted first. At most `RETRY_BATCH_SIZE`.
    ///
    /// Back-off depends on the attempt count, so an event attempted long ago can still be waiting while a newer one is
    /// due. Pending events are paged through until a full batch is due or there are none left.
    pub async fn retry_candidates(
        &self,
        provider: WebhookProvider,
        policy: &RetryPolicy,
    ) -> Result<Vec<WebhookEvent>, WebhookError> {
        let now = self.clock.now();
        let mut due = Vec::new();
        let mut offset = 0;
        loop {
            let page = self
                .db
                .fetch_unprocessed_webhook_events(provider, policy.max_attempts, RETRY_BATCH_SIZE, offset)
                .await?;
            let page_len = page.len() as i64;
            due.extend(page.into_iter().filter(|e| policy.is_due(e, now)));
            if due.len() as i64 >= RETRY_BATCH_SIZE || page_len < RETRY_BATCH_SIZE {
                break;
            }
            offset += page_len;
        }
        due.truncate(RETRY_BATCH_SIZE as usize);
        Ok(due)
    }

    pub async fn fetch_webhook_event(
        &self,
        provider: WebhookProvider,
        event_id: &str,
    ) -> Result<Option<WebhookEvent>, WebhookError> {
        Ok(self.db.fetch_webhook_event(provider, event_id).await?)
    }
}

fn actor(provider: WebhookProvider) -> String {
    format!("webhook:{provider}")
}

#[cfg(test)]
mod test {
    use chrono::TimeZone;

    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy { base_delay: Duration::seconds(30), max_delay: Duration::minutes(10), max_attempts: 5 }
    }

    #[test]
    fn backoff_doubles_and_is_capped() {
        let p = policy();
        assert_eq!(p.delay(0), Duration::seconds(30));
        assert_eq!(p.delay(1), Duration::seconds(30));
        assert_eq!(p.delay(2), Duration::seconds(60));
        assert_eq!(p.delay(3), Duration::seconds(120));
        assert_eq!(p.delay(5), Duration::seconds(480));
        assert_eq!(p.delay(6), Duration::minutes(10));
        assert_eq!(p.delay(1_000), Duration::minutes(10));
    }

    #[test]
    fn due_events() {
        let last = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let event = WebhookEvent {
            event_id: "evt_1".into(),
            event_type: "payment_intent.succeeded".into(),
            first_seen_at: last,
            attempts: 2,
            last_attempt_at: last,
            processed_at: None,
            last_error: Some("No stripe order is linked".into()),
            payload: "{}".into(),
        };
        let p = policy();
        assert!(!p.is_due(&event, last + Duration::seconds(59)));
        assert!(p.is_due(&event, last + Duration::seconds(60)));
        let exhausted = WebhookEvent { attempts: 5, ..event.clone() };
        assert!(!p.is_due(&exhausted, last + Duration::days(1)));
        let done = WebhookEvent { processed_at: Some(last), ..event };
        assert!(!p.is_due(&done, last + Duration::days(1)));
    }
}
