//! Checkout orchestration: snapshot validation, payment intent hand-off, and
//! the single transaction that reserves stock, freezes prices, redeems the
//! coupon, creates the order, and clears the cart.

use std::sync::Arc;

use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter, Set,
    SqlErr, Statement, TransactionTrait,
};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::{cart, cart_item, coupon, order, order_item};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::gateway::PaymentGateway;
use crate::models::{CartSnapshot, IntentHandle, StockUnitRef};
use crate::services::order_status::{self, OrderStatus, PaymentStatus};
use crate::services::payment_intents::PaymentIntentBroker;
use crate::services::pricing::PricingValidator;
use crate::services::signatures::SignatureVerifier;
use crate::services::stock_ledger::{ReservationRequest, StockLedger};

const ORDER_NUMBER_ATTEMPTS: usize = 5;

pub struct CheckoutService {
    db: DbPool,
    ledger: StockLedger,
    pricing: PricingValidator,
    broker: Arc<PaymentIntentBroker>,
    gateway: Arc<dyn PaymentGateway>,
    signatures: Arc<SignatureVerifier>,
    events: EventSender,
}

impl CheckoutService {
    pub fn new(
        db: DbPool,
        broker: Arc<PaymentIntentBroker>,
        gateway: Arc<dyn PaymentGateway>,
        signatures: Arc<SignatureVerifier>,
        events: EventSender,
    ) -> Self {
        Self {
            db,
            ledger: StockLedger::new(),
            pricing: PricingValidator::new(),
            broker,
            gateway,
            signatures,
            events,
        }
    }

    /// Step one of prepaid checkout: validate the snapshot against the
    /// catalog, then open a gateway intent for the computed total. No stock
    /// moves here.
    #[instrument(skip(self, snapshot), fields(user_id = %user_id))]
    pub async fn begin_checkout(
        &self,
        user_id: Uuid,
        mut snapshot: CartSnapshot,
    ) -> Result<IntentHandle, ServiceError> {
        let total = self.pricing.validate(&self.db, &snapshot).await?;
        snapshot.total = total;
        self.broker.create_intent(user_id, snapshot).await
    }

    /// Step two of prepaid checkout: verify the gateway's signature over the
    /// intent/payment pair, re-validate the held snapshot, then commit the
    /// order. The intent is consumed before any of this, so replays fail
    /// with `NotFound`.
    #[instrument(skip(self, signature), fields(user_id = %user_id, intent_id = %intent_id))]
    pub async fn confirm_payment(
        &self,
        user_id: Uuid,
        intent_id: &str,
        payment_id: &str,
        signature: &str,
    ) -> Result<order::Model, ServiceError> {
        self.signatures.verify_payment(intent_id, payment_id, signature)?;

        let record = self.broker.consume_intent(intent_id, user_id).await?;

        let payment = self.gateway.fetch_payment(payment_id).await?;
        if payment.status != "captured" && payment.status != "authorized" {
            return Err(ServiceError::PaymentFailed(format!(
                "payment {} is in state {}",
                payment_id, payment.status
            )));
        }

        // Prices may have moved while the customer was on the gateway page.
        self.pricing.validate(&self.db, &record.snapshot).await?;

        let created = self
            .commit_order(
                user_id,
                &record.snapshot,
                "PREPAID",
                Some(payment_id.to_string()),
                OrderStatus::Confirmed,
                PaymentStatus::Paid,
            )
            .await?;

        self.events
            .send_or_log(Event::PaymentCaptured {
                order_id: created.id,
                payment_id: payment_id.to_string(),
            })
            .await;
        Ok(created)
    }

    /// Cash-on-delivery checkout: no gateway round-trip and no snapshot
    /// re-validation; totals are recomputed from reservation-time prices
    /// inside the commit. The order is confirmed immediately; only the
    /// payment stays pending until delivery.
    #[instrument(skip(self, snapshot), fields(user_id = %user_id))]
    pub async fn place_cod_order(
        &self,
        user_id: Uuid,
        snapshot: CartSnapshot,
    ) -> Result<order::Model, ServiceError> {
        self.commit_order(
            user_id,
            &snapshot,
            "COD",
            None,
            OrderStatus::Confirmed,
            PaymentStatus::Pending,
        )
        .await
    }

    /// Customer-initiated cancellation. Restores stock, releases the coupon
    /// redemption, and appends the status history row, all in one
    /// transaction.
    #[instrument(skip(self), fields(user_id = %user_id, order_id = %order_id))]
    pub async fn cancel_order(
        &self,
        user_id: Uuid,
        order_id: Uuid,
        reason: Option<String>,
    ) -> Result<order::Model, ServiceError> {
        let txn = self.db.begin().await?;

        let model = order::Entity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("order {} not found", order_id)))?;
        if model.customer_id != user_id {
            return Err(ServiceError::NotFound(format!("order {} not found", order_id)));
        }

        let status = OrderStatus::parse(&model.status)?;
        if !status.is_cancellable() {
            return Err(ServiceError::InvalidOperation(format!(
                "order in state {} cannot be cancelled",
                model.status
            )));
        }

        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&txn)
            .await?;
        let restore: Vec<ReservationRequest> = items
            .iter()
            .map(|i| ReservationRequest {
                unit: StockUnitRef {
                    product_id: i.product_id,
                    variant_id: i.variant_id,
                },
                quantity: i.quantity,
            })
            .collect();
        self.ledger.restore(&txn, &restore).await?;

        if let Some(code) = model.coupon_code.clone() {
            self.release_coupon(&txn, &code).await?;
        }

        let updated =
            order_status::apply_order_transition(&txn, model, OrderStatus::Cancelled, reason)
                .await?;

        txn.commit().await?;

        for item in &restore {
            self.events
                .send_or_log(Event::StockRestored {
                    product_id: item.unit.product_id,
                    variant_id: item.unit.variant_id,
                    quantity: item.quantity,
                })
                .await;
        }
        self.events.send_or_log(Event::OrderCancelled(order_id)).await;

        info!(order_id = %order_id, "order cancelled");
        Ok(updated)
    }

    /// The commit transaction. Order of operations inside the transaction:
    /// stock reservation first (the only step that can fail on contention),
    /// then coupon redemption, order + line items, and cart clearing. Any
    /// error rolls the whole thing back.
    async fn commit_order(
        &self,
        user_id: Uuid,
        snapshot: &CartSnapshot,
        payment_method: &str,
        payment_id: Option<String>,
        status: OrderStatus,
        payment_status: PaymentStatus,
    ) -> Result<order::Model, ServiceError> {
        if snapshot.items.is_empty() {
            return Err(ServiceError::ValidationError("cart is empty".into()));
        }

        let txn = self.db.begin().await?;

        let requests: Vec<ReservationRequest> = snapshot
            .items
            .iter()
            .map(|i| ReservationRequest {
                unit: i.unit_ref(),
                quantity: i.quantity,
            })
            .collect();
        let reserved = self.ledger.reserve(&txn, &requests).await?;

        // Line items freeze the reservation-time prices, not the client's.
        let subtotal: Decimal = reserved
            .iter()
            .map(|r| r.unit_price * Decimal::from(r.quantity))
            .sum();

        let discount = match snapshot.coupon_code.as_deref() {
            Some(code) => self.redeem_coupon(&txn, code, user_id, subtotal).await?,
            None => Decimal::ZERO,
        };
        let total = subtotal - discount + snapshot.tax;

        let order_id = Uuid::new_v4();
        let now = Utc::now();

        // The pre-check inside generate_order_number loses races; the unique
        // column constraint catches those, and we regenerate instead of
        // failing the checkout.
        let mut order_number = None;
        for _ in 0..ORDER_NUMBER_ATTEMPTS {
            let candidate = self.generate_order_number(&txn).await?;
            let row = order::ActiveModel {
                id: Set(order_id),
                order_number: Set(candidate.clone()),
                customer_id: Set(user_id),
                status: Set(status.as_str().to_string()),
                payment_status: Set(payment_status.as_str().to_string()),
                subtotal: Set(subtotal),
                discount_amount: Set(discount),
                tax_amount: Set(snapshot.tax),
                total_amount: Set(total),
                currency: Set(snapshot.currency.clone()),
                shipping_address_id: Set(snapshot.shipping_address_id),
                payment_method: Set(payment_method.to_string()),
                payment_id: Set(payment_id.clone()),
                coupon_code: Set(snapshot.coupon_code.clone()),
                tracking_number: Set(None),
                estimated_delivery: Set(None),
                notes: Set(None),
                created_at: Set(now),
                updated_at: Set(None),
                version: Set(1),
            };
            match order::Entity::insert(row).exec(&txn).await {
                Ok(_) => {
                    order_number = Some(candidate);
                    break;
                }
                Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                    warn!(candidate = %candidate, "order number collided on insert, regenerating");
                }
                Err(e) => return Err(e.into()),
            }
        }
        let order_number = order_number.ok_or_else(|| {
            ServiceError::InternalError("could not generate a unique order number".into())
        })?;

        for item in &reserved {
            let line = order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(item.unit.product_id),
                variant_id: Set(item.unit.variant_id),
                name: Set(item.name.clone()),
                quantity: Set(item.quantity),
                price_at_purchase: Set(item.unit_price),
                line_total: Set(item.unit_price * Decimal::from(item.quantity)),
                created_at: Set(now),
            };
            order_item::Entity::insert(line).exec(&txn).await?;
        }

        order_status::record_status_history(&txn, order_id, status.as_str(), None).await?;

        self.clear_active_cart(&txn, user_id).await?;

        let created = order::Entity::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::InternalError("order vanished inside its own transaction".into())
            })?;

        txn.commit().await?;

        for item in &reserved {
            self.events
                .send_or_log(Event::StockReserved {
                    product_id: item.unit.product_id,
                    variant_id: item.unit.variant_id,
                    quantity: item.quantity,
                })
                .await;
        }
        self.events.send_or_log(Event::OrderCreated(order_id)).await;

        info!(order_id = %order_id, order_number = %order_number, total = %total, "order created");
        Ok(created)
    }

    /// Redeems a coupon with a conditional increment so the global usage
    /// limit holds under concurrency. Returns the discount amount.
    async fn redeem_coupon<C: ConnectionTrait>(
        &self,
        conn: &C,
        code: &str,
        user_id: Uuid,
        subtotal: Decimal,
    ) -> Result<Decimal, ServiceError> {
        let model = coupon::Entity::find()
            .filter(coupon::Column::Code.eq(code))
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::ValidationError(format!("unknown coupon {}", code)))?;

        if !model.is_valid_at(Utc::now()) {
            return Err(ServiceError::ValidationError(format!(
                "coupon {} is not currently valid",
                code
            )));
        }

        if model.per_user_limit > 0 {
            let used = order::Entity::find()
                .filter(order::Column::CustomerId.eq(user_id))
                .filter(order::Column::CouponCode.eq(code))
                .filter(order::Column::Status.ne(OrderStatus::Cancelled.as_str()))
                .count(conn)
                .await?;
            if used >= model.per_user_limit as u64 {
                return Err(ServiceError::ValidationError(format!(
                    "coupon {} already used the maximum number of times",
                    code
                )));
            }
        }

        let backend = conn.get_database_backend();
        let sql = match backend {
            sea_orm::DbBackend::Postgres => {
                "UPDATE coupons SET usage_count = usage_count + 1 \
                 WHERE code = $1 AND is_active = TRUE \
                 AND (usage_limit = 0 OR usage_count < usage_limit)"
            }
            _ => {
                "UPDATE coupons SET usage_count = usage_count + 1 \
                 WHERE code = ? AND is_active = TRUE \
                 AND (usage_limit = 0 OR usage_count < usage_limit)"
            }
        };
        let result = conn
            .execute(Statement::from_sql_and_values(
                backend,
                sql,
                vec![code.into()],
            ))
            .await?;
        if result.rows_affected() == 0 {
            return Err(ServiceError::ValidationError(format!(
                "coupon {} is exhausted",
                code
            )));
        }

        Ok(model.discount_for(subtotal))
    }

    async fn release_coupon<C: ConnectionTrait>(
        &self,
        conn: &C,
        code: &str,
    ) -> Result<(), ServiceError> {
        let backend = conn.get_database_backend();
        let sql = match backend {
            sea_orm::DbBackend::Postgres => {
                "UPDATE coupons SET usage_count = usage_count - 1 \
                 WHERE code = $1 AND usage_count > 0"
            }
            _ => {
                "UPDATE coupons SET usage_count = usage_count - 1 \
                 WHERE code = ? AND usage_count > 0"
            }
        };
        conn.execute(Statement::from_sql_and_values(
            backend,
            sql,
            vec![code.into()],
        ))
        .await?;
        Ok(())
    }

    /// Marks the customer's active cart converted and removes its items.
    /// Missing cart is fine; checkout does not require one to exist.
    async fn clear_active_cart<C: ConnectionTrait>(
        &self,
        conn: &C,
        user_id: Uuid,
    ) -> Result<(), ServiceError> {
        let active = cart::Entity::find()
            .filter(cart::Column::CustomerId.eq(user_id))
            .filter(cart::Column::Status.eq(cart::CartStatus::Active))
            .one(conn)
            .await?;

        if let Some(model) = active {
            let cart_id = model.id;
            cart_item::Entity::delete_many()
                .filter(cart_item::Column::CartId.eq(cart_id))
                .exec(conn)
                .await?;
            let mut active_model: cart::ActiveModel = model.into();
            active_model.status = Set(cart::CartStatus::Converted);
            active_model.updated_at = Set(Utc::now());
            active_model.update(conn).await?;
            self.events.send_or_log(Event::CartCleared(cart_id)).await;
        }
        Ok(())
    }

    /// Generates a unique human-facing order number, retrying on the rare
    /// collision. The unique column constraint is the backstop.
    async fn generate_order_number<C: ConnectionTrait>(
        &self,
        conn: &C,
    ) -> Result<String, ServiceError> {
        for _ in 0..ORDER_NUMBER_ATTEMPTS {
            let suffix: String = rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(6)
                .map(|c| (c as char).to_ascii_uppercase())
                .collect();
            let candidate = format!("ORD-{}-{}", Utc::now().format("%Y%m%d"), suffix);

            let exists = order::Entity::find()
                .filter(order::Column::OrderNumber.eq(candidate.clone()))
                .count(conn)
                .await?;
            if exists == 0 {
                return Ok(candidate);
            }
            warn!(candidate = %candidate, "order number collision, regenerating");
        }
        Err(ServiceError::InternalError(
            "could not generate a unique order number".into(),
        ))
    }
}
