//! Gateway webhook endpoint. The signature is computed over the raw body,
//! so the body must be taken as bytes before any JSON parsing.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde_json::{json, Value};
use tracing::{error, instrument, warn};

use crate::errors::ServiceError;
use crate::AppState;

const SIGNATURE_HEADER: &str = "x-webhook-signature";

/// Receive a payment gateway webhook.
///
/// Responses: 401 for a missing or invalid signature, 400 for a body that is
/// not JSON, and 200 for everything else. Processing failures after a valid
/// signature still return 200 so the gateway does not retry forever; the
/// failure is logged for reconciliation.
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    request_body(content = String, description = "Raw gateway event JSON"),
    responses(
        (status = 200, description = "Webhook accepted"),
        (status = 400, description = "Malformed body"),
        (status = 401, description = "Invalid signature")
    ),
    tag = "webhooks"
)]
#[instrument(skip(state, headers, body))]
pub async fn receive_payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ServiceError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ServiceError::AuthError("missing webhook signature".into()))?;

    state.services.signatures.verify_webhook(&body, signature)?;

    let payload: Value = serde_json::from_slice(&body).map_err(|e| {
        warn!(error = %e, "webhook body is not valid JSON");
        ServiceError::ValidationError("webhook body is not valid JSON".into())
    })?;

    if let Err(e) = state.services.reconciler.handle(payload).await {
        error!(error = %e, "webhook processing failed");
    }

    Ok((StatusCode::OK, Json(json!({ "status": "ok" }))))
}
