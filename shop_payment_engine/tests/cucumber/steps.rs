use std::str::FromStr;

use chrono::Duration;
use cucumber::{then, when};
use rust_decimal::Decimal;
use shop_payment_engine::{
    db_types::{AuditChain, OrderEventKind, OrderStatusType, PaymentMethod, WebhookProvider},
    pricing::CartLine,
    CheckoutRequest,
    PaymentEffect,
    WebhookNotification,
    WebhookOutcome,
};

use crate::cucumber::{shop_world::CURRENCY, ShopWorld};

fn amount(s: &str) -> Decimal {
    Decimal::from_str(s).expect("Not a valid amount")
}

//  When customer 'alice' checks out a cart worth 100.00 with 20.00 shipping and promo SPRING10, paying with stripe session cs_1
#[when(expr = "customer {string} checks out a cart worth {word} with {word} shipping and promo {word}, paying with stripe session {word}")]
async fn checkout_with_promo(world: &mut ShopWorld, customer: String, total: String, shipping: String, promo: String, session: String) {
    let request = CheckoutRequest::new(&customer, CURRENCY, PaymentMethod::Stripe)
        .with_line(CartLine::new("CART", amount(&total), 1))
        .with_shipping("courier", amount(&shipping))
        .with_promo_code(&promo)
        .with_provider_reference(&session);
    let (order, _) = world.system().orders.create_order(request).await.expect("Error creating order");
    world.last_order = Some(order);
}

#[when(expr = "customer {string} checks out a cart worth {word}, paying with stripe session {word}")]
async fn checkout(world: &mut ShopWorld, customer: String, total: String, session: String) {
    let request = CheckoutRequest::new(&customer, CURRENCY, PaymentMethod::Stripe)
        .with_line(CartLine::new("CART", amount(&total), 1))
        .with_provider_reference(&session);
    let (order, _) = world.system().orders.create_order(request).await.expect("Error creating order");
    world.last_order = Some(order);
}

#[when(expr = "stripe delivers event {word} capturing payment for {word}")]
async fn stripe_capture(world: &mut ShopWorld, event_id: String, session: String) {
    let notification = WebhookNotification {
        payload: format!(r#"{{"id":"{event_id}","type":"checkout.session.completed"}}"#),
        event_id,
        event_type: "checkout.session.completed".into(),
        effect: PaymentEffect::PaymentCaptured { reference: session },
    };
    let outcome = world
        .system()
        .webhooks
        .process(WebhookProvider::Stripe, &notification)
        .await
        .expect("Error processing webhook");
    world.last_outcome = Some(outcome);
}

#[when(expr = "{int} minutes pass")]
async fn time_passes(world: &mut ShopWorld, minutes: i64) {
    world.system().clock.advance(Duration::minutes(minutes));
}

#[when(expr = "the expiry sweep runs with a {int} minute payment window")]
async fn expiry_sweep(world: &mut ShopWorld, minutes: i64) {
    world.system().orders.expire_stale_orders(Duration::minutes(minutes)).await.expect("Error running expiry sweep");
}

async fn refresh_order(world: &mut ShopWorld) {
    let id = world.last_order().id.clone();
    let order = world.system().orders.fetch_order(&id).await.expect("Error fetching order").expect("Order vanished");
    world.last_order = Some(order);
}

#[then(expr = "the order total is {word} with {word} VAT")]
async fn check_totals(world: &mut ShopWorld, total: String, vat: String) {
    let order = world.last_order();
    assert_eq!(order.total_amount.to_string(), total);
    assert_eq!(order.tax_amount.to_string(), vat);
}

#[then(expr = "the order status is {word}")]
async fn check_status(world: &mut ShopWorld, status: String) {
    refresh_order(world).await;
    let expected = OrderStatusType::from_str(&status).expect("Not a valid order status");
    assert_eq!(world.last_order().status, expected);
}

#[then(expr = "the order was cancelled because of {word}")]
async fn check_cancel_reason(world: &mut ShopWorld, reason: String) {
    refresh_order(world).await;
    assert_eq!(world.last_order().cancel_reason.as_deref(), Some(reason.as_str()));
}

#[then(expr = "the webhook was {word}")]
async fn check_outcome(world: &mut ShopWorld, outcome: String) {
    let actual = world.last_outcome.as_ref().expect("No webhook has been delivered");
    let matched = match outcome.as_str() {
        "applied" => matches!(actual, WebhookOutcome::Applied(_)),
        "acknowledged" => matches!(actual, WebhookOutcome::Duplicate),
        "rejected" => matches!(actual, WebhookOutcome::Rejected(_)),
        "ignored" => matches!(actual, WebhookOutcome::Ignored),
        other => panic!("Unknown webhook outcome {other}"),
    };
    assert!(matched, "Expected the webhook to be {outcome}, but it was {actual:?}");
}

#[then(expr = "the order has {int} status change event(s)")]
async fn check_status_changes(world: &mut ShopWorld, count: usize) {
    let id = world.last_order().id.clone();
    let events = world.system().orders.fetch_order_events(&id).await.expect("Error fetching events");
    assert_eq!(events.iter().filter(|e| e.kind == OrderEventKind::StatusChange).count(), count);
}

#[then(expr = "promo code {word} has been used {int} time(s)")]
async fn check_promo_usage(world: &mut ShopWorld, code: String, count: i64) {
    let promo = world.system().orders.fetch_promo_code(&code).await.expect("Error fetching promo").expect("No promo");
    assert_eq!(promo.times_used, count);
}

#[then(expr = "stripe event {word} was delivered {int} time(s)")]
async fn check_attempts(world: &mut ShopWorld, event_id: String, count: i64) {
    let event = world
        .system()
        .webhooks
        .fetch_webhook_event(WebhookProvider::Stripe, &event_id)
        .await
        .expect("Error fetching webhook event")
        .expect("Webhook event was not recorded");
    assert_eq!(event.attempts, count);
}

#[then(expr = "the security audit chain verifies with {int} entries")]
async fn check_security_chain(world: &mut ShopWorld, count: usize) {
    let report = world.system().audit.verify_chain(AuditChain::Security).await.expect("Audit chain is broken");
    assert_eq!(report.verified, count);
}
