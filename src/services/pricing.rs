//! Pricing Snapshot Validator: re-derives the client's cart totals from the
//! catalog and rejects anything that drifted between page render and payment.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use tracing::instrument;

use crate::entities::{coupon, product, product_variant};
use crate::errors::ServiceError;
use crate::models::{CartSnapshot, SnapshotItem};

/// Absolute tolerance for per-unit and total comparisons. Covers currency
/// rounding only; anything larger is a stale or tampered snapshot.
const PRICE_EPSILON: Decimal = dec!(0.01);

#[derive(Debug, Clone, Copy, Default)]
pub struct PricingValidator;

impl PricingValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validates every line item against the current catalog price and the
    /// snapshot totals against their recomputation. Returns the
    /// server-computed total on success.
    #[instrument(skip(self, conn, snapshot), fields(items = snapshot.items.len()))]
    pub async fn validate<C: ConnectionTrait>(
        &self,
        conn: &C,
        snapshot: &CartSnapshot,
    ) -> Result<Decimal, ServiceError> {
        if snapshot.items.is_empty() {
            return Err(ServiceError::ValidationError("cart is empty".into()));
        }

        let mut subtotal = Decimal::ZERO;
        for item in &snapshot.items {
            let current = self.current_unit_price(conn, item).await?;
            if (current - item.unit_price).abs() > PRICE_EPSILON {
                return Err(ServiceError::PriceMismatch(format!(
                    "price changed for {}: cart has {}, current is {}",
                    item.unit_ref(),
                    item.unit_price,
                    current
                )));
            }
            subtotal += current * Decimal::from(item.quantity);
        }

        if (subtotal - snapshot.subtotal).abs() > PRICE_EPSILON {
            return Err(ServiceError::PriceMismatch(format!(
                "subtotal mismatch: cart has {}, computed {}",
                snapshot.subtotal, subtotal
            )));
        }

        let discount = match snapshot.coupon_code.as_deref() {
            Some(code) => self.coupon_discount(conn, code, subtotal).await?,
            None => Decimal::ZERO,
        };
        if (discount - snapshot.discount).abs() > PRICE_EPSILON {
            return Err(ServiceError::PriceMismatch(format!(
                "discount mismatch: cart has {}, computed {}",
                snapshot.discount, discount
            )));
        }

        let total = subtotal - discount + snapshot.tax;
        if (total - snapshot.total).abs() > PRICE_EPSILON {
            return Err(ServiceError::PriceMismatch(format!(
                "total mismatch: cart has {}, computed {}",
                snapshot.total, total
            )));
        }

        Ok(total)
    }

    async fn current_unit_price<C: ConnectionTrait>(
        &self,
        conn: &C,
        item: &SnapshotItem,
    ) -> Result<Decimal, ServiceError> {
        let product = product::Entity::find_by_id(item.product_id)
            .one(conn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("product {} not found", item.product_id))
            })?;
        if !product.is_active {
            return Err(ServiceError::ProductUnavailable(format!(
                "{} is no longer available",
                product.name
            )));
        }

        match item.variant_id {
            Some(variant_id) => {
                let variant = product_variant::Entity::find_by_id(variant_id)
                    .one(conn)
                    .await?
                    .filter(|v| v.product_id == item.product_id)
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!(
                            "variant {} not found for product {}",
                            variant_id, item.product_id
                        ))
                    })?;
                if !variant.is_active {
                    return Err(ServiceError::ProductUnavailable(format!(
                        "{} ({}) is no longer available",
                        product.name, variant.name
                    )));
                }
                Ok(variant.price.unwrap_or_else(|| product.effective_price()))
            }
            None => Ok(product.effective_price()),
        }
    }

    async fn coupon_discount<C: ConnectionTrait>(
        &self,
        conn: &C,
        code: &str,
        subtotal: Decimal,
    ) -> Result<Decimal, ServiceError> {
        let coupon = coupon::Entity::find()
            .filter(coupon::Column::Code.eq(code))
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::ValidationError(format!("unknown coupon {}", code)))?;

        let now = chrono::Utc::now();
        if !coupon.is_valid_at(now) {
            return Err(ServiceError::ValidationError(format!(
                "coupon {} is not currently valid",
                code
            )));
        }
        Ok(coupon.discount_for(subtotal))
    }
}
