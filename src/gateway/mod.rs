//! Payment gateway collaborator. Only the interface boundary matters here:
//! minting a gateway-side order/intent, and fetching a payment's status.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::instrument;

use crate::config::AppConfig;
use crate::errors::ServiceError;

#[derive(Debug, Clone, Serialize)]
pub struct CreateIntentRequest {
    /// Amount in minor currency units (cents, paise, ...).
    pub amount: i64,
    pub currency: String,
    /// Merchant-side receipt reference attached as metadata; webhooks echo
    /// it back so the reconciler can find the business order.
    pub receipt: String,
    pub notes: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayIntent {
    pub id: String,
    pub amount: i64,
    pub currency: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayPayment {
    pub id: String,
    /// Gateway order/intent this payment settles.
    #[serde(default)]
    pub order_id: Option<String>,
    pub status: String,
    pub amount: i64,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_intent(&self, req: CreateIntentRequest) -> Result<GatewayIntent, ServiceError>;
    async fn fetch_payment(&self, payment_id: &str) -> Result<GatewayPayment, ServiceError>;
}

/// REST client for the gateway, authenticated with basic auth
/// (key id / key secret).
pub struct HttpPaymentGateway {
    http: reqwest::Client,
    base_url: String,
    key_id: String,
    key_secret: String,
}

impl HttpPaymentGateway {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.gateway_api_url.trim_end_matches('/').to_string(),
            key_id: config.gateway_key_id.clone(),
            key_secret: config.gateway_key_secret.clone(),
        }
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self, req), fields(amount = req.amount, currency = %req.currency))]
    async fn create_intent(&self, req: CreateIntentRequest) -> Result<GatewayIntent, ServiceError> {
        let response = self
            .http
            .post(format!("{}/orders", self.base_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(&req)
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("gateway request: {}", e)))?;

        if !response.status().is_success() {
            return Err(ServiceError::ExternalServiceError(format!(
                "gateway returned {} creating intent",
                response.status()
            )));
        }

        response
            .json::<GatewayIntent>()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("gateway response: {}", e)))
    }

    #[instrument(skip(self))]
    async fn fetch_payment(&self, payment_id: &str) -> Result<GatewayPayment, ServiceError> {
        let response = self
            .http
            .get(format!("{}/payments/{}", self.base_url, payment_id))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("gateway request: {}", e)))?;

        if !response.status().is_success() {
            return Err(ServiceError::ExternalServiceError(format!(
                "gateway returned {} fetching payment {}",
                response.status(),
                payment_id
            )));
        }

        response
            .json::<GatewayPayment>()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("gateway response: {}", e)))
    }
}
