mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

use storefront_api::auth::issue_token;
use storefront_api::cache::InMemoryCache;
use storefront_api::config::AppConfig;
use storefront_api::events::EventSender;
use storefront_api::gateway::PaymentGateway;
use storefront_api::services::signatures::SignatureVerifier;
use storefront_api::{app, AppState};

use common::{seed_product, setup_db, MockGateway};

const JWT_SECRET: &str = "integration-test-secret-with-enough-length";

struct HttpHarness {
    router: axum::Router,
    db: sea_orm::DatabaseConnection,
    signatures: SignatureVerifier,
}

async fn http_harness() -> HttpHarness {
    let db = setup_db().await;
    let mut config = AppConfig::new(
        "sqlite::memory:".to_string(),
        "redis://127.0.0.1:6379".to_string(),
        JWT_SECRET.to_string(),
        "127.0.0.1".to_string(),
        0,
        "test".to_string(),
    );
    config.gateway_key_secret = "http-test-gateway-secret".to_string();
    config.payment_webhook_secret = "http-test-webhook-secret".to_string();
    let config = Arc::new(config);

    let signatures = SignatureVerifier::from_config(&config);
    let gateway: Arc<dyn PaymentGateway> = Arc::new(MockGateway::new());
    let (tx, mut rx) = mpsc::channel(64);
    tokio::spawn(async move { while rx.recv().await.is_some() {} });

    let state = AppState::new(
        db.clone(),
        config,
        Arc::new(InMemoryCache::new()),
        gateway,
        EventSender::new(tx),
    );
    HttpHarness {
        router: app(state),
        db,
        signatures,
    }
}

fn bearer(user_id: Uuid) -> String {
    format!("Bearer {}", issue_token(user_id, JWT_SECRET, 3600).unwrap())
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn orders_require_a_bearer_token() {
    let h = http_harness().await;
    let response = h
        .router
        .oneshot(
            Request::builder()
                .uri("/api/v1/orders")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn cod_checkout_over_http_creates_an_order() {
    let h = http_harness().await;
    let user_id = Uuid::new_v4();
    let product = seed_product(&h.db, dec!(40.00), 10).await;

    let payload = json!({
        "cart": {
            "items": [{
                "product_id": product.id,
                "quantity": 2,
                "unit_price": "40.00"
            }],
            "subtotal": "80.00",
            "total": "80.00",
            "currency": "USD",
            "shipping_address_id": Uuid::new_v4()
        }
    });

    let response = h
        .router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/payments/cod")
                .header(header::AUTHORIZATION, bearer(user_id))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(payload.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert_eq!(body["data"]["status"], "CONFIRMED");
    assert_eq!(body["data"]["payment_method"], "COD");
    assert_eq!(body["data"]["items"].as_array().unwrap().len(), 1);

    // The order shows up in the customer's listing.
    let response = h
        .router
        .oneshot(
            Request::builder()
                .uri("/api/v1/orders")
                .header(header::AUTHORIZATION, bearer(user_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["total"], 1);
}

#[tokio::test]
async fn webhook_with_bad_signature_is_unauthorized() {
    let h = http_harness().await;
    let body = json!({ "event": "payment.captured", "id": "evt_1", "payload": {} }).to_string();

    let response = h
        .router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/payments/webhook")
                .header("x-webhook-signature", "not-a-signature")
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn webhook_with_valid_signature_is_accepted() {
    let h = http_harness().await;
    let body = json!({ "event": "invoice.generated", "id": "evt_2", "payload": {} }).to_string();
    let signature = h.signatures.webhook_signature(body.as_bytes());

    let response = h
        .router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/payments/webhook")
                .header("x-webhook-signature", signature)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn health_endpoint_reports_backing_stores() {
    let h = http_harness().await;
    let response = h
        .router
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], true);
    assert_eq!(body["cache"], true);
}
