use std::{fmt::Debug, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use log::*;
use rust_decimal::Decimal;
use serde_json::json;

use super::{
    audit_api::{append_entry, AuditSettings},
    errors::OrderFlowError,
    order_objects::{CheckoutRequest, ExpiryResult, TransitionOutcome},
    promo_ledger::{record_promo_usage, validate_promo_code},
};
use crate::{
    db_types::{
        AuditChain,
        NewAuditEntry,
        NewOrder,
        NewOrderEvent,
        Order,
        OrderEvent,
        OrderEventKind,
        OrderId,
        OrderStatusType,
        PromoCode,
    },
    events::{EventProducers, OrderStatusChangedEvent},
    helpers::new_reference_code,
    order_flow::{decide, OrderTransition, TransitionDecision},
    pricing::{line_subtotal, promo_discount, Breakdown, PricingConfig},
    traits::{Clock, PaymentStore, StoreError, StoreTransaction},
};

const REFERENCE_CODE_ATTEMPTS: usize = 5;
const EXPIRY_BATCH_SIZE: i64 = 500;
pub const EXPIRY_ACTOR: &str = "scheduler:order_expiry";

/// The store-independent settings for the order flow.
#[derive(Debug, Clone)]
pub struct OrderFlowSettings {
    /// The shop's single currency. Checkout requests in any other currency are refused.
    pub currency: String,
    pub pricing: PricingConfig,
    pub audit: AuditSettings,
    /// How many stale orders the expiry sweep reads per page
    pub expiry_batch_size: i64,
}

impl OrderFlowSettings {
    pub fn new(currency: &str, pricing: PricingConfig, audit: AuditSettings) -> Self {
        Self { currency: currency.to_string(), pricing, audit, expiry_batch_size: EXPIRY_BATCH_SIZE }
    }

    pub fn with_expiry_batch_size(mut self, size: i64) -> Self {
        self.expiry_batch_size = size.max(1);
        self
    }
}

/// `OrderFlowApi` owns the order lifecycle: creating orders from checkout, and moving them through the transition
/// table in response to payments, merchant actions and expiry.
///
/// Every change to an order happens in one transaction together with its order event and its security audit entry.
/// Subscribers are notified after the commit.
pub struct OrderFlowApi<B> {
    db: B,
    settings: OrderFlowSettings,
    clock: Arc<dyn Clock>,
    producers: EventProducers,
}

impl<B> Debug for OrderFlowApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OrderFlowApi ({})", self.settings.currency)
    }
}

impl<B> OrderFlowApi<B> {
    pub fn new(db: B, settings: OrderFlowSettings, clock: Arc<dyn Clock>) -> Self {
        Self { db, settings, clock, producers: EventProducers::default() }
    }

    pub fn with_producers(mut self, producers: EventProducers) -> Self {
        self.producers = producers;
        self
    }

    pub fn db(&self) -> &B {
        &self.db
    }

    pub fn settings(&self) -> &OrderFlowSettings {
        &self.settings
    }
}

impl<B> OrderFlowApi<B>
where B: PaymentStore
{
    /// Prices the cart and records a new order.
    ///
    /// Orders paid online start in `pending_payment`. Cash on delivery orders start in `pending_acceptance`, and
    /// since no payment confirmation will ever arrive for them, their promo use is counted straight away.
    pub async fn create_order(&self, request: CheckoutRequest) -> Result<(Order, Breakdown), OrderFlowError> {
        if request.customer_id.trim().is_empty() {
            return Err(OrderFlowError::InvalidCheckout("A customer id is required".into()));
        }
        if !request.currency.eq_ignore_ascii_case(&self.settings.currency) {
            return Err(OrderFlowError::InvalidCheckout(format!(
                "This shop only takes {} orders, not {}",
                self.settings.currency, request.currency
            )));
        }
        if request.provider_reference.is_some() && request.payment_method.provider().is_none() {
            return Err(OrderFlowError::InvalidCheckout(format!(
                "{} orders do not have a provider reference",
                request.payment_method
            )));
        }
        let now = self.clock.now();
        let mode = self.settings.pricing.rounding;
        let subtotal = line_subtotal(&request.lines, mode)?;
        let promo_code = request.promo_code.as_deref().map(str::trim).filter(|c| !c.is_empty());
        let discount = match promo_code {
            Some(code) => {
                let promo = self.db.fetch_promo_code(code).await?.ok_or_else(|| OrderFlowError::InvalidPromoCode {
                    code: code.to_string(),
                    reason: "The code does not exist".into(),
                })?;
                let discount = validate_promo_code(&promo, &self.settings.currency, now)?;
                promo_discount(&discount, subtotal, mode)
            },
            None => Decimal::ZERO,
        };
        let shipping = request.shipping.as_ref().map(|s| s.amount).unwrap_or(Decimal::ZERO);
        let breakdown = self.settings.pricing.simulate(subtotal, discount, shipping)?;

        for attempt in 1..=REFERENCE_CODE_ATTEMPTS {
            let new_order = NewOrder {
                id: OrderId::random(),
                reference_code: new_reference_code(),
                customer_id: request.customer_id.clone(),
                currency: self.settings.currency.clone(),
                subtotal: breakdown.subtotal,
                discount: breakdown.discount,
                shipping_amount: breakdown.shipping,
                fee_amount: breakdown.fee,
                tax_amount: breakdown.vat,
                total_amount: breakdown.total,
                shipping_method: request.shipping.as_ref().map(|s| s.method.clone()),
                status: request.payment_method.initial_status(),
                payment_method: request.payment_method,
                provider_reference: request.provider_reference.clone(),
                promo_code: promo_code.map(String::from),
                created_at: now,
            };
            match self.insert_new_order(&new_order, &breakdown, now).await {
                Ok(order) => {
                    info!(
                        "🔄️📦️ Order {} ({}) created for customer {}. Total {} {}, status {}.",
                        order.reference_code, order.id, order.customer_id, order.total_amount, order.currency, order.status
                    );
                    return Ok((order, breakdown));
                },
                Err(OrderFlowError::Store(StoreError::UniqueViolation(msg))) => {
                    if self.db.fetch_order_by_reference_code(&new_order.reference_code).await?.is_none() {
                        // Not a reference code collision, so the provider reference is already taken
                        return Err(OrderFlowError::InvalidCheckout(format!(
                            "The provider reference is already linked to another order. {msg}"
                        )));
                    }
                    warn!("🔄️📦️ Reference code collision on attempt {attempt}. Trying again.");
                },
                Err(e) => return Err(e),
            }
        }
        Err(OrderFlowError::ReferenceCodeExhausted(REFERENCE_CODE_ATTEMPTS))
    }

    async fn insert_new_order(
        &self,
        new_order: &NewOrder,
        breakdown: &Breakdown,
        now: DateTime<Utc>,
    ) -> Result<Order, OrderFlowError> {
        let mut tx = self.db.begin().await?;
        let order = tx.insert_order(new_order).await?;
        let payload = json!({
            "reference_code": order.reference_code,
            "status": order.status,
            "payment_method": order.payment_method,
            "promo_code": order.promo_code,
            "breakdown": breakdown,
        });
        tx.insert_order_event(&NewOrderEvent::new(order.id.clone(), OrderEventKind::Created, payload), now).await?;
        if order.status == OrderStatusType::PendingAcceptance {
            record_promo_usage(&mut tx, &order, now).await?;
        }
        tx.commit().await?;
        Ok(order)
    }

    /// Attaches the payment provider's session, intent or transaction id to an order that is still awaiting payment.
    ///
    /// An order is linked at most once. Repeating the call with the same reference is harmless.
    pub async fn link_provider_reference(
        &self,
        order_id: &OrderId,
        reference: &str,
        actor: &str,
    ) -> Result<Order, OrderFlowError> {
        let reject = |reason: &str| OrderFlowError::ProviderReferenceRejected {
            order_id: order_id.clone(),
            reason: reason.to_string(),
        };
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(reject("The reference is empty"));
        }
        let mut tx = self.db.begin().await?;
        let order = tx.lock_order(order_id).await?.ok_or_else(|| OrderFlowError::OrderNotFound(order_id.to_string()))?;
        match order.provider_reference.as_deref() {
            Some(existing) if existing == reference => return Ok(order),
            Some(_) => return Err(reject("The order is already linked to a different reference")),
            None => {},
        }
        if order.payment_method.provider().is_none() {
            return Err(reject(&format!("{} orders are not paid through a provider", order.payment_method)));
        }
        if order.status != OrderStatusType::PendingPayment {
            return Err(reject(&format!("The order is {}", order.status)));
        }
        let now = self.clock.now();
        let order = match tx.set_provider_reference(order_id, reference, now).await {
            Ok(order) => order,
            Err(StoreError::UniqueViolation(_)) => {
                return Err(reject("The reference is already linked to another order"));
            },
            Err(e) => return Err(e.into()),
        };
        let payload = json!({ "provider_reference": reference, "actor": actor });
        tx.insert_order_event(&NewOrderEvent::new(order.id.clone(), OrderEventKind::ProviderLinked, payload), now)
            .await?;
        tx.commit().await?;
        debug!("🔄️🔗️ Order {} linked to {} reference {reference}", order.id, order.payment_method);
        Ok(order)
    }

    /// Applies `transition` to the order under its row lock.
    ///
    /// Transitions that the table forbids are rejected with [`OrderFlowError::InvalidTransition`] and change nothing.
    /// Triggers that have already taken effect return [`TransitionOutcome::Unchanged`].
    pub async fn apply_transition(
        &self,
        order_id: &OrderId,
        transition: OrderTransition,
        actor: &str,
    ) -> Result<TransitionOutcome, OrderFlowError> {
        let mut tx = self.db.begin().await?;
        let order = tx.lock_order(order_id).await?.ok_or_else(|| OrderFlowError::OrderNotFound(order_id.to_string()))?;
        let now = self.clock.now();
        let outcome = apply_locked(&mut tx, order, &transition, actor, &self.settings.audit, self.clock.as_ref(), now).await?;
        if !matches!(outcome, TransitionOutcome::Unchanged { .. }) {
            tx.commit().await?;
        }
        publish_outcome(&self.producers, &outcome, actor);
        Ok(outcome)
    }

    /// Administrative status change. Maps `new_status` onto a manual transition, so the transition table still
    /// applies: an admin can ship a paid order, but cannot move it back to `pending_payment`, and cannot mark an order
    /// as paid for without a payment confirmation.
    pub async fn modify_status_for_order(
        &self,
        order_id: &OrderId,
        new_status: OrderStatusType,
        reason: Option<String>,
        actor: &str,
    ) -> Result<Order, OrderFlowError> {
        let outcome = self.apply_transition(order_id, OrderTransition::Manual { to: new_status, reason }, actor).await?;
        Ok(outcome.order().clone())
    }

    /// Cancels every order that has been waiting for payment for longer than `ttl`.
    ///
    /// Each order is expired in its own transaction. An order that gets paid while the sweep runs is skipped, and a
    /// failure on one order does not stop the rest. Stale orders are read a page at a time, continuing after the last
    /// order of the previous page, so orders that keep failing never hide the ones behind them.
    pub async fn expire_stale_orders(&self, ttl: Duration) -> Result<ExpiryResult, OrderFlowError> {
        let cutoff = self.clock.now() - ttl;
        let batch_size = self.settings.expiry_batch_size;
        let mut result = ExpiryResult::default();
        let mut after = None;
        loop {
            let stale = self.db.fetch_stale_pending_orders(cutoff, after.take(), batch_size).await?;
            let page_len = stale.len() as i64;
            if page_len > 0 {
                debug!("🔄️⏰️ {page_len} unpaid order(s) older than {cutoff} found");
            }
            for order in stale {
                after = Some((order.created_at, order.id.clone()));
                match self.apply_transition(&order.id, OrderTransition::Expire, EXPIRY_ACTOR).await {
                    Ok(TransitionOutcome::Moved { order, .. }) => result.expired.push(order.id),
                    Ok(_) => result.skipped.push(order.id),
                    Err(e) => {
                        warn!("🔄️⏰️ Could not expire order {}. {e}", order.id);
                        result.failed.push((order.id, e.to_string()));
                    },
                }
            }
            if page_len < batch_size {
                break;
            }
        }
        if result.expired.is_empty() && result.skipped.is_empty() && result.failed.is_empty() {
            trace!("🔄️⏰️ No unpaid orders older than {cutoff}");
            return Ok(result);
        }
        info!(
            "🔄️⏰️ Expiry sweep complete. {} expired, {} skipped, {} failed.",
            result.expired.len(),
            result.skipped.len(),
            result.failed.len()
        );
        Ok(result)
    }

    pub async fn fetch_order(&self, order_id: &OrderId) -> Result<Option<Order>, OrderFlowError> {
        Ok(self.db.fetch_order(order_id).await?)
    }

    pub async fn fetch_order_by_reference_code(&self, reference_code: &str) -> Result<Option<Order>, OrderFlowError> {
        Ok(self.db.fetch_order_by_reference_code(reference_code).await?)
    }

    pub async fn fetch_order_events(&self, order_id: &OrderId) -> Result<Vec<OrderEvent>, OrderFlowError> {
        Ok(self.db.fetch_order_events(order_id).await?)
    }

    pub async fn fetch_promo_code(&self, code: &str) -> Result<Option<PromoCode>, OrderFlowError> {
        Ok(self.db.fetch_promo_code(code).await?)
    }
}

/// Carries out `transition` on an order whose row lock is held by `tx`.
///
/// This is the only code path that changes an order's status. Both the public API and webhook ingestion go through
/// it, so the same bookkeeping (order event, promo ledger, security audit entry) happens whoever triggers the change.
/// The caller commits.
pub(crate) async fn apply_locked<T: StoreTransaction>(
    tx: &mut T,
    order: Order,
    transition: &OrderTransition,
    actor: &str,
    audit: &AuditSettings,
    clock: &dyn Clock,
    now: DateTime<Utc>,
) -> Result<TransitionOutcome, OrderFlowError> {
    let from = order.status;
    match decide(from, transition) {
        TransitionDecision::Move(to) => {
            let reason = if to == OrderStatusType::Cancelled { transition.cancel_reason() } else { None };
            let updated = tx.update_order_status(&order.id, to, reason, now).await?;
            let payload = json!({
                "from": from,
                "to": to,
                "trigger": transition.name(),
                "actor": actor,
                "reason": reason,
            });
            tx.insert_order_event(&NewOrderEvent::new(order.id.clone(), OrderEventKind::StatusChange, payload.clone()), now)
                .await?;
            if from == OrderStatusType::PendingPayment && to == OrderStatusType::PendingAcceptance {
                record_promo_usage(tx, &updated, now).await?;
            }
            let entry = NewAuditEntry::new("order_status_changed", actor, format!("order:{}", order.id))
                .with_payload(json!({ "reference_code": order.reference_code, "change": payload }));
            append_entry(tx, audit, clock, AuditChain::Security, entry).await?;
            info!("🔄️ Order {} moved from {from} to {to} ({transition} by {actor})", order.reference_code);
            Ok(TransitionOutcome::Moved { order: updated, from })
        },
        TransitionDecision::Record => {
            let updated = tx.increment_payment_retry_count(&order.id, now).await?;
            let reason = match transition {
                OrderTransition::PaymentFailed { reason } => reason.as_str(),
                _ => "",
            };
            let payload = json!({ "reason": reason, "attempt": updated.payment_retry_count, "actor": actor });
            tx.insert_order_event(&NewOrderEvent::new(order.id.clone(), OrderEventKind::PaymentFailed, payload), now)
                .await?;
            debug!(
                "🔄️ Payment attempt #{} failed for order {}. {reason}",
                updated.payment_retry_count, order.reference_code
            );
            Ok(TransitionOutcome::Recorded { order: updated })
        },
        TransitionDecision::NoOp => {
            debug!("🔄️ {transition} has already taken effect on order {} ({from}). Nothing to do.", order.reference_code);
            Ok(TransitionOutcome::Unchanged { order })
        },
        TransitionDecision::InvalidTransition => {
            info!("🔄️ Rejected {transition} on order {} ({from}) by {actor}", order.reference_code);
            Err(OrderFlowError::InvalidTransition { order_id: order.id, from, transition: transition.to_string() })
        },
    }
}

pub(crate) fn publish_outcome(producers: &EventProducers, outcome: &TransitionOutcome, actor: &str) {
    if let TransitionOutcome::Moved { order, from } = outcome {
        producers.publish_status_changed(OrderStatusChangedEvent::new(order.clone(), *from, actor));
    }
}
