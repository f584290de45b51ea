//! Domain types that cross service boundaries without being database rows.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Reference to a stock-carrying unit: a bare product, or a specific
/// product+variant combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct StockUnitRef {
    pub product_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<Uuid>,
}

impl std::fmt::Display for StockUnitRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.variant_id {
            Some(v) => write!(f, "{}/{}", self.product_id, v),
            None => write!(f, "{}", self.product_id),
        }
    }
}

/// One line of a client-submitted cart snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct SnapshotItem {
    pub product_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant_id: Option<Uuid>,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    pub quantity: i32,
    /// Unit price the client saw when the snapshot was taken.
    pub unit_price: Decimal,
}

impl SnapshotItem {
    pub fn unit_ref(&self) -> StockUnitRef {
        StockUnitRef {
            product_id: self.product_id,
            variant_id: self.variant_id,
        }
    }
}

/// Immutable client description of an intended purchase. Input to validation
/// only; never trusted as ground truth for final pricing.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CartSnapshot {
    #[validate(length(min = 1, message = "Cart must contain at least one item"))]
    pub items: Vec<SnapshotItem>,
    pub subtotal: Decimal,
    #[serde(default)]
    pub discount: Decimal,
    #[serde(default)]
    pub tax: Decimal,
    pub total: Decimal,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coupon_code: Option<String>,
    pub shipping_address_id: Uuid,
}

fn default_currency() -> String {
    "USD".to_string()
}

/// Ephemeral binding between a gateway intent and the snapshot that produced
/// it. Lives only in the cache under a TTL; losing it safely fails checkout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntentRecord {
    pub user_id: Uuid,
    pub snapshot: CartSnapshot,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// What the client needs to complete payment with the gateway.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct IntentHandle {
    pub intent_id: String,
    /// Amount in minor currency units, as the gateway expects.
    pub amount_minor: i64,
    pub currency: String,
    pub expires_at: DateTime<Utc>,
}
