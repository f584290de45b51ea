//! Stock Ledger: exclusive owner of per-unit available-quantity counters.
//!
//! All mutation is relative (decrement/increment) through single conditional
//! statements; callers never read-then-write a counter. `reserve` is the only
//! path that can fail on quantity, and when it fails mid-batch it compensates
//! every decrement it already made before returning, so a bare-connection
//! caller is left consistent and a transactional caller can still roll back.

use rust_decimal::Decimal;
use sea_orm::{ConnectionTrait, DbBackend, EntityTrait, Statement, Value};
use tracing::{info, warn};

use crate::entities::{product, product_variant};
use crate::errors::ServiceError;
use crate::models::StockUnitRef;

#[derive(Debug, Clone)]
pub struct ReservationRequest {
    pub unit: StockUnitRef,
    pub quantity: i32,
}

/// Outcome of a successful per-unit reservation. Carries the price in effect
/// at reservation time and a display name for line-item freezing and error
/// messages.
#[derive(Debug, Clone)]
pub struct ReservedItem {
    pub unit: StockUnitRef,
    pub quantity: i32,
    pub unit_price: Decimal,
    pub name: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StockLedger;

impl StockLedger {
    pub fn new() -> Self {
        Self
    }

    /// Atomically reserves stock for every request, in order.
    ///
    /// Each unit is decremented with a single conditional update
    /// (`available_quantity >= quantity` predicate), so two concurrent
    /// reservations can never jointly oversell a unit. If any unit fails the
    /// predicate, all decrements made so far are compensated and the whole
    /// reservation fails with `InsufficientStock`.
    pub async fn reserve<C: ConnectionTrait>(
        &self,
        conn: &C,
        requests: &[ReservationRequest],
    ) -> Result<Vec<ReservedItem>, ServiceError> {
        let mut reserved: Vec<ReservedItem> = Vec::with_capacity(requests.len());

        for request in requests {
            if request.quantity <= 0 {
                self.restore_reserved(conn, &reserved).await?;
                return Err(ServiceError::ValidationError(format!(
                    "invalid quantity {} for unit {}",
                    request.quantity, request.unit
                )));
            }

            let info = match self.unit_info(conn, &request.unit).await {
                Ok(info) => info,
                Err(e) => {
                    self.restore_reserved(conn, &reserved).await?;
                    return Err(e);
                }
            };

            let decremented = match self
                .conditional_decrement(conn, &request.unit, request.quantity)
                .await
            {
                Ok(decremented) => decremented,
                Err(e) => {
                    self.restore_reserved(conn, &reserved).await?;
                    return Err(e);
                }
            };
            if !decremented {
                self.restore_reserved(conn, &reserved).await?;
                return Err(ServiceError::InsufficientStock(format!(
                    "{} has insufficient stock",
                    info.name
                )));
            }

            self.log_low_stock(conn, &request.unit, &info).await;

            reserved.push(ReservedItem {
                unit: request.unit,
                quantity: request.quantity,
                unit_price: info.unit_price,
                name: info.name,
            });
        }

        Ok(reserved)
    }

    /// Unconditionally restores quantities. Used for cancellations and for
    /// compensation; always succeeds for existing units.
    pub async fn restore<C: ConnectionTrait>(
        &self,
        conn: &C,
        items: &[ReservationRequest],
    ) -> Result<(), ServiceError> {
        for item in items {
            self.increment(conn, &item.unit, item.quantity).await?;
        }
        Ok(())
    }

    async fn restore_reserved<C: ConnectionTrait>(
        &self,
        conn: &C,
        reserved: &[ReservedItem],
    ) -> Result<(), ServiceError> {
        for item in reserved {
            self.increment(conn, &item.unit, item.quantity).await?;
        }
        Ok(())
    }

    async fn conditional_decrement<C: ConnectionTrait>(
        &self,
        conn: &C,
        unit: &StockUnitRef,
        quantity: i32,
    ) -> Result<bool, ServiceError> {
        let backend = conn.get_database_backend();
        let (sql, values): (&str, Vec<Value>) = match unit.variant_id {
            Some(variant_id) => (
                "UPDATE product_variants SET available_quantity = available_quantity - ? \
                 WHERE id = ? AND available_quantity >= ?",
                vec![quantity.into(), variant_id.into(), quantity.into()],
            ),
            None => (
                "UPDATE products SET available_quantity = available_quantity - ? \
                 WHERE id = ? AND available_quantity >= ?",
                vec![quantity.into(), unit.product_id.into(), quantity.into()],
            ),
        };
        let result = conn
            .execute(Statement::from_sql_and_values(
                backend,
                rebind(sql, backend),
                values,
            ))
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn increment<C: ConnectionTrait>(
        &self,
        conn: &C,
        unit: &StockUnitRef,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        let backend = conn.get_database_backend();
        let (sql, values): (&str, Vec<Value>) = match unit.variant_id {
            Some(variant_id) => (
                "UPDATE product_variants SET available_quantity = available_quantity + ? \
                 WHERE id = ?",
                vec![quantity.into(), variant_id.into()],
            ),
            None => (
                "UPDATE products SET available_quantity = available_quantity + ? WHERE id = ?",
                vec![quantity.into(), unit.product_id.into()],
            ),
        };
        let result = conn
            .execute(Statement::from_sql_and_values(
                backend,
                rebind(sql, backend),
                values,
            ))
            .await?;
        if result.rows_affected() == 0 {
            // Restore targets vanished rows only when the unit was deleted
            // out from under an in-flight order; surface it, callers decide.
            return Err(ServiceError::NotFound(format!(
                "stock unit {} not found",
                unit
            )));
        }
        info!(unit = %unit, quantity = quantity, "stock restored");
        Ok(())
    }

    async fn unit_info<C: ConnectionTrait>(
        &self,
        conn: &C,
        unit: &StockUnitRef,
    ) -> Result<UnitInfo, ServiceError> {
        let product = product::Entity::find_by_id(unit.product_id)
            .one(conn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("product {} not found", unit.product_id))
            })?;

        match unit.variant_id {
            Some(variant_id) => {
                let variant = product_variant::Entity::find_by_id(variant_id)
                    .one(conn)
                    .await?
                    .filter(|v| v.product_id == unit.product_id)
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!(
                            "variant {} not found for product {}",
                            variant_id, unit.product_id
                        ))
                    })?;
                Ok(UnitInfo {
                    name: format!("{} ({})", product.name, variant.name),
                    unit_price: variant.price.unwrap_or_else(|| product.effective_price()),
                    low_stock_threshold: variant.low_stock_threshold,
                })
            }
            None => Ok(UnitInfo {
                unit_price: product.effective_price(),
                low_stock_threshold: product.low_stock_threshold,
                name: product.name,
            }),
        }
    }

    async fn log_low_stock<C: ConnectionTrait>(&self, conn: &C, unit: &StockUnitRef, info: &UnitInfo) {
        let remaining = match unit.variant_id {
            Some(variant_id) => product_variant::Entity::find_by_id(variant_id)
                .one(conn)
                .await
                .ok()
                .flatten()
                .map(|v| v.available_quantity),
            None => product::Entity::find_by_id(unit.product_id)
                .one(conn)
                .await
                .ok()
                .flatten()
                .map(|p| p.available_quantity),
        };
        if let Some(remaining) = remaining {
            if remaining <= info.low_stock_threshold {
                warn!(unit = %unit, remaining = remaining, name = %info.name, "stock below threshold");
            }
        }
    }
}

struct UnitInfo {
    name: String,
    unit_price: Decimal,
    low_stock_threshold: i32,
}

/// Rewrites `?` placeholders to `$n` for Postgres; sqlite and mysql take
/// `?` as-is.
fn rebind(sql: &str, backend: DbBackend) -> String {
    match backend {
        DbBackend::Postgres => {
            let mut out = String::with_capacity(sql.len() + 8);
            let mut n = 0;
            for ch in sql.chars() {
                if ch == '?' {
                    n += 1;
                    out.push('$');
                    out.push_str(&n.to_string());
                } else {
                    out.push(ch);
                }
            }
            out
        }
        _ => sql.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rebind_numbers_postgres_placeholders() {
        assert_eq!(
            rebind("UPDATE t SET q = q - ? WHERE id = ? AND q >= ?", DbBackend::Postgres),
            "UPDATE t SET q = q - $1 WHERE id = $2 AND q >= $3"
        );
        assert_eq!(
            rebind("UPDATE t SET q = q - ? WHERE id = ?", DbBackend::Sqlite),
            "UPDATE t SET q = q - ? WHERE id = ?"
        );
    }
}
