use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Discount coupon. `usage_count` moves only inside the transaction that
/// commits or cancels an order referencing the code, so it never drifts from
/// the true count of non-cancelled orders.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "coupons")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub code: String,
    /// "percentage" or "fixed"
    pub discount_type: String,
    #[sea_orm(column_type = "Decimal(Some((12, 4)))")]
    pub discount_value: Decimal,
    pub usage_limit: i32,
    pub usage_count: i32,
    pub per_user_limit: i32,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        self.is_active && at >= self.valid_from && at <= self.valid_until
    }

    /// Discount for a given subtotal, clamped to the subtotal.
    pub fn discount_for(&self, subtotal: Decimal) -> Decimal {
        let raw = match self.discount_type.as_str() {
            "percentage" => subtotal * self.discount_value / Decimal::from(100),
            _ => self.discount_value,
        };
        raw.min(subtotal)
    }
}
