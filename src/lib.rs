//! Storefront checkout API: cart validation, payment intents, stock
//! reservation, order commit, and gateway webhook reconciliation over
//! axum and sea-orm.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use utoipa::ToSchema;

pub mod auth;
pub mod cache;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod gateway;
pub mod handlers;
pub mod models;
pub mod services;

use crate::cache::CacheBackend;
use crate::config::AppConfig;
use crate::db::DbPool;
use crate::events::EventSender;
use crate::gateway::PaymentGateway;
use crate::services::checkout::CheckoutService;
use crate::services::orders::OrderService;
use crate::services::payment_intents::PaymentIntentBroker;
use crate::services::reconciliation::WebhookReconciler;
use crate::services::signatures::SignatureVerifier;

/// Service instances shared across handlers.
#[derive(Clone)]
pub struct AppServices {
    pub checkout: Arc<CheckoutService>,
    pub orders: Arc<OrderService>,
    pub reconciler: Arc<WebhookReconciler>,
    pub signatures: Arc<SignatureVerifier>,
}

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub config: Arc<AppConfig>,
    pub cache: Arc<dyn CacheBackend>,
    pub event_sender: EventSender,
    pub services: AppServices,
}

impl AppState {
    pub fn new(
        db: DbPool,
        config: Arc<AppConfig>,
        cache: Arc<dyn CacheBackend>,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: EventSender,
    ) -> Self {
        let signatures = Arc::new(SignatureVerifier::from_config(&config));
        let broker = Arc::new(PaymentIntentBroker::new(
            gateway.clone(),
            cache.clone(),
            Duration::from_secs(config.payment_intent_ttl_secs),
        ));
        let services = AppServices {
            checkout: Arc::new(CheckoutService::new(
                db.clone(),
                broker,
                gateway,
                signatures.clone(),
                event_sender.clone(),
            )),
            orders: Arc::new(OrderService::new(db.clone())),
            reconciler: Arc::new(WebhookReconciler::new(
                db.clone(),
                cache.clone(),
                event_sender.clone(),
            )),
            signatures,
        };
        Self {
            db,
            config,
            cache,
            event_sender,
            services,
        }
    }
}

/// Standard success envelope.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiResponse<T> {
    pub status: String,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            status: "success".to_string(),
            data,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PaginatedResponse<T> {
    pub status: String,
    pub data: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
    pub total_pages: u64,
}

impl<T> PaginatedResponse<T> {
    pub fn new(data: Vec<T>, total: u64, page: u64, per_page: u64) -> Self {
        let per_page = per_page.max(1);
        Self {
            status: "success".to_string(),
            data,
            total,
            page,
            per_page,
            total_pages: total.div_ceil(per_page),
        }
    }
}

/// Liveness check. Pings the database and cache; an unreachable
/// database makes the whole service unhealthy, a cache miss is degraded but
/// still serving (checkout falls back to failing intents loudly).
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let database_ok = state.db.ping().await.is_ok();
    let cache_ok = state.cache.exists("health:ping").await.is_ok();

    let status = if database_ok && cache_ok {
        "ok"
    } else if database_ok {
        "degraded"
    } else {
        "unhealthy"
    };
    let code = if database_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(json!({
            "status": status,
            "database": database_ok,
            "cache": cache_ok,
        })),
    )
}

async fn app_status(State(state): State<AppState>) -> impl IntoResponse {
    let database_ok = state.db.ping().await.is_ok();
    let cache_ok = state.cache.exists("health:ping").await.is_ok();
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "environment": state.config.environment.clone(),
        "database": database_ok,
        "cache": cache_ok,
    }))
}

/// Versioned API routes.
pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/payments/create-cart-order",
            post(handlers::payments::begin_checkout),
        )
        .route(
            "/payments/verify-and-create",
            post(handlers::payments::confirm_payment),
        )
        .route("/payments/cod", post(handlers::payments::place_cod_order))
        .route("/orders", get(handlers::orders::list_orders))
        .route("/orders/:id", get(handlers::orders::get_order))
        .route("/orders/:id/cancel", post(handlers::orders::cancel_order))
        .route(
            "/payments/webhook",
            post(handlers::payment_webhooks::receive_payment_webhook),
        )
}

/// Builds the full application router with middleware applied.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/status", get(app_status))
        .nest("/api/v1", api_v1_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .with_state(state)
}
