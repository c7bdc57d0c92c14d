use actix_web::{http::StatusCode, test::TestRequest};
use chrono::Duration;
use serde_json::json;
use shop_payment_engine::{
    db_types::{OrderEventKind, OrderStatusType, PaymentMethod, WebhookProvider},
    Clock,
};

use super::helpers::{stripe_signature, TestShop, STRIPE_SECRET};

fn stripe_succeeded(event_id: &str, intent: &str) -> String {
    json!({
        "id": event_id,
        "type": "payment_intent.succeeded",
        "data": {"object": {"id": intent, "object": "payment_intent", "amount": 5000, "currency": "ron"}}
    })
    .to_string()
}

#[actix_web::test]
async fn health() {
    let _ = env_logger::try_init().ok();
    let shop = TestShop::new().await;
    let (status, body) = shop.send(TestRequest::get().uri("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "👍️\n");
}

#[actix_web::test]
async fn signed_stripe_capture_moves_the_order() {
    let _ = env_logger::try_init().ok();
    let shop = TestShop::new().await;
    let order = shop.order_paid_with(PaymentMethod::Stripe, "pi_100").await;
    let (status, body) = shop.send(shop.stripe_request(&stripe_succeeded("evt_100", "pi_100"))).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(body.contains(r#""success":true"#), "{body}");
    assert_eq!(shop.fetch_order(&order).await.status, OrderStatusType::PendingAcceptance);
}

#[actix_web::test]
async fn redelivery_is_acknowledged_without_effect() {
    let _ = env_logger::try_init().ok();
    let shop = TestShop::new().await;
    let order = shop.order_paid_with(PaymentMethod::Stripe, "pi_101").await;
    let body = stripe_succeeded("evt_101", "pi_101");
    let (status, _) = shop.send(shop.stripe_request(&body)).await;
    assert_eq!(status, StatusCode::OK);
    let (status, response) = shop.send(shop.stripe_request(&body)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(response.contains("Already processed"), "{response}");
    let row = shop.webhook_api().fetch_webhook_event(WebhookProvider::Stripe, "evt_101").await.unwrap().unwrap();
    assert_eq!(row.attempts, 2);
    let events = shop.orders.fetch_order_events(&order.id).await.unwrap();
    assert_eq!(events.iter().filter(|e| e.kind == OrderEventKind::StatusChange).count(), 1);
}

#[actix_web::test]
async fn forged_signature_is_refused_before_storage() {
    let _ = env_logger::try_init().ok();
    let shop = TestShop::new().await;
    let order = shop.order_paid_with(PaymentMethod::Stripe, "pi_102").await;
    let body = stripe_succeeded("evt_102", "pi_102");
    let header = stripe_signature(&body, shop.clock.now().timestamp(), "whsec_guessed");
    let req = TestRequest::post().uri("/webhook/stripe").insert_header(("Stripe-Signature", header)).set_payload(body);
    let (status, response) = shop.send(req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(!response.contains(STRIPE_SECRET));
    assert!(shop.webhook_api().fetch_webhook_event(WebhookProvider::Stripe, "evt_102").await.unwrap().is_none());
    assert_eq!(shop.fetch_order(&order).await.status, OrderStatusType::PendingPayment);
}

#[actix_web::test]
async fn missing_signature_is_refused() {
    let _ = env_logger::try_init().ok();
    let shop = TestShop::new().await;
    let req = TestRequest::post().uri("/webhook/stripe").set_payload(stripe_succeeded("evt_103", "pi_103"));
    let (status, _) = shop.send(req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[actix_web::test]
async fn replayed_stripe_request_is_refused_once_stale() {
    let _ = env_logger::try_init().ok();
    let shop = TestShop::new().await;
    shop.order_paid_with(PaymentMethod::Stripe, "pi_104").await;
    let req = shop.stripe_request(&stripe_succeeded("evt_104", "pi_104"));
    shop.advance(Duration::seconds(301));
    let (status, _) = shop.send(req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(shop.webhook_api().fetch_webhook_event(WebhookProvider::Stripe, "evt_104").await.unwrap().is_none());
}

#[actix_web::test]
async fn unreadable_body_is_a_bad_request() {
    let _ = env_logger::try_init().ok();
    let shop = TestShop::new().await;
    let (status, body) = shop.send(shop.stripe_request(r#"{"id": "evt_105"}"#)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    assert!(body.contains("error"));
    assert!(shop.webhook_api().fetch_webhook_event(WebhookProvider::Stripe, "evt_105").await.unwrap().is_none());
}

#[actix_web::test]
async fn unknown_reference_asks_for_a_redelivery() {
    let _ = env_logger::try_init().ok();
    let shop = TestShop::new().await;
    let (status, _) = shop.send(shop.stripe_request(&stripe_succeeded("evt_106", "pi_nobody"))).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let row = shop.webhook_api().fetch_webhook_event(WebhookProvider::Stripe, "evt_106").await.unwrap().unwrap();
    assert!(!row.is_processed());
    assert!(row.last_error.unwrap().contains("pi_nobody"));
}

#[actix_web::test]
async fn late_capture_of_expired_order_is_acknowledged_but_rejected() {
    let _ = env_logger::try_init().ok();
    let shop = TestShop::new().await;
    let order = shop.order_paid_with(PaymentMethod::Stripe, "pi_107").await;
    shop.advance(Duration::minutes(61));
    shop.orders.expire_stale_orders(Duration::minutes(60)).await.unwrap();
    let (status, body) = shop.send(shop.stripe_request(&stripe_succeeded("evt_107", "pi_107"))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains(r#""success":false"#), "{body}");
    let order = shop.fetch_order(&order).await;
    assert_eq!(order.status, OrderStatusType::Cancelled);
    assert_eq!(order.cancel_reason.as_deref(), Some("payment_timeout"));
}

#[actix_web::test]
async fn signed_paypal_capture() {
    let _ = env_logger::try_init().ok();
    let shop = TestShop::new().await;
    let order = shop.order_paid_with(PaymentMethod::PayPal, "5O190127TN364715T").await;
    let body = json!({
        "id": "WH-58D329510W468432D-8HN650336L201105X",
        "event_type": "PAYMENT.CAPTURE.COMPLETED",
        "resource": {
            "id": "42311647XV020574X",
            "status": "COMPLETED",
            "supplementary_data": {"related_ids": {"order_id": "5O190127TN364715T"}}
        }
    })
    .to_string();
    let (status, response) = shop.send(shop.paypal_request("69cd13f0-d67a-11e5-baa3-778b53f4ae55", &body)).await;
    assert_eq!(status, StatusCode::OK, "{response}");
    assert_eq!(shop.fetch_order(&order).await.status, OrderStatusType::PendingAcceptance);

    let forged = shop
        .paypal_request("69cd13f0-d67a-11e5-baa3-778b53f4ae55", &body)
        .insert_header(("PayPal-Transmission-Id", "another-transmission"));
    let (status, _) = shop.send(forged).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[actix_web::test]
async fn signed_netopia_payment_then_refund() {
    let _ = env_logger::try_init().ok();
    let shop = TestShop::new().await;
    let order = shop.order_paid_with(PaymentMethod::Netopia, "1234567").await;
    let ipn = |status: i64| {
        json!({"order": {"orderID": order.reference_code}, "payment": {"ntpID": "1234567", "status": status}})
            .to_string()
    };
    let (status, _) = shop.send(shop.netopia_request(&ipn(3))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(shop.fetch_order(&order).await.status, OrderStatusType::PendingAcceptance);
    let (status, _) = shop.send(shop.netopia_request(&ipn(11))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(shop.fetch_order(&order).await.status, OrderStatusType::Refunded);
    let row = shop.webhook_api().fetch_webhook_event(WebhookProvider::Netopia, "1234567:11").await.unwrap().unwrap();
    assert!(row.is_processed());
}

#[actix_web::test]
async fn disabled_checks_let_unsigned_requests_through() {
    let _ = env_logger::try_init().ok();
    let shop = TestShop::new().await.without_signature_checks();
    let order = shop.order_paid_with(PaymentMethod::Stripe, "pi_108").await;
    let req = TestRequest::post().uri("/webhook/stripe").set_payload(stripe_succeeded("evt_108", "pi_108"));
    let (status, _) = shop.send(req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(shop.fetch_order(&order).await.status, OrderStatusType::PendingAcceptance);
}
