//! Checkout endpoints: intent creation, payment confirmation, and
//! cash-on-delivery orders.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::auth::AuthenticatedUser;
use crate::errors::ServiceError;
use crate::models::{CartSnapshot, IntentHandle};
use crate::services::orders::OrderResponse;
use crate::{AppState, ApiResponse};

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct BeginCheckoutRequest {
    #[validate]
    pub cart: CartSnapshot,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ConfirmPaymentRequest {
    #[validate(length(min = 1, message = "Intent id is required"))]
    pub intent_id: String,
    #[validate(length(min = 1, message = "Payment id is required"))]
    pub payment_id: String,
    #[validate(length(min = 1, message = "Signature is required"))]
    pub signature: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BeginCheckoutResponse {
    pub intent: IntentHandle,
}

/// Validate the cart snapshot and open a payment intent with the gateway.
#[utoipa::path(
    post,
    path = "/api/v1/payments/create-cart-order",
    request_body = BeginCheckoutRequest,
    responses(
        (status = 200, description = "Intent created", body = BeginCheckoutResponse),
        (status = 400, description = "Snapshot rejected"),
        (status = 401, description = "Missing or invalid token")
    ),
    security(("bearer_auth" = [])),
    tag = "checkout"
)]
pub async fn begin_checkout(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(req): Json<BeginCheckoutRequest>,
) -> Result<Json<ApiResponse<BeginCheckoutResponse>>, ServiceError> {
    req.validate()?;
    let intent = state
        .services
        .checkout
        .begin_checkout(user.id, req.cart)
        .await?;
    Ok(Json(ApiResponse::ok(BeginCheckoutResponse { intent })))
}

/// Verify the gateway signature and commit the order.
#[utoipa::path(
    post,
    path = "/api/v1/payments/verify-and-create",
    request_body = ConfirmPaymentRequest,
    responses(
        (status = 201, description = "Order created", body = OrderResponse),
        (status = 400, description = "Invalid or tampered payment details"),
        (status = 404, description = "Intent unknown or already used"),
        (status = 409, description = "Insufficient stock")
    ),
    security(("bearer_auth" = [])),
    tag = "checkout"
)]
pub async fn confirm_payment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(req): Json<ConfirmPaymentRequest>,
) -> Result<(StatusCode, Json<ApiResponse<OrderResponse>>), ServiceError> {
    req.validate()?;
    let order = state
        .services
        .checkout
        .confirm_payment(user.id, &req.intent_id, &req.payment_id, &req.signature)
        .await?;
    let response = state.services.orders.get_order(order.id, user.id).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(response))))
}

/// Place a cash-on-delivery order directly from a cart snapshot.
#[utoipa::path(
    post,
    path = "/api/v1/payments/cod",
    request_body = BeginCheckoutRequest,
    responses(
        (status = 201, description = "Order created", body = OrderResponse),
        (status = 409, description = "Insufficient stock")
    ),
    security(("bearer_auth" = [])),
    tag = "checkout"
)]
pub async fn place_cod_order(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(req): Json<BeginCheckoutRequest>,
) -> Result<(StatusCode, Json<ApiResponse<OrderResponse>>), ServiceError> {
    req.validate()?;
    let order = state
        .services
        .checkout
        .place_cod_order(user.id, req.cart)
        .await?;
    let response = state.services.orders.get_order(order.id, user.id).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(response))))
}
