//! Webhook Reconciler: applies asynchronous gateway notifications to orders.
//!
//! The reconciler never creates orders. Signature verification happens in the
//! handler before anything reaches here; this layer deduplicates by event id
//! (best-effort, cache-backed) and applies state-conditional transitions, so
//! a replayed or out-of-order event is a no-op rather than a corruption.

use std::sync::Arc;
use std::time::Duration;

use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set, TransactionTrait};
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::cache::CacheBackend;
use crate::db::DbPool;
use crate::entities::order;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::order_status::{self, OrderStatus, PaymentStatus};

const DEDUP_TTL: Duration = Duration::from_secs(24 * 60 * 60);

pub struct WebhookReconciler {
    db: DbPool,
    cache: Arc<dyn CacheBackend>,
    events: EventSender,
}

impl WebhookReconciler {
    pub fn new(db: DbPool, cache: Arc<dyn CacheBackend>, events: EventSender) -> Self {
        Self { db, cache, events }
    }

    /// Processes one verified webhook payload. Unknown event types and
    /// events that reference no known order are logged and dropped; the
    /// gateway gets a 200 either way so it stops retrying.
    #[instrument(skip(self, payload))]
    pub async fn handle(&self, payload: Value) -> Result<(), ServiceError> {
        let event_type = payload
            .get("event")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let event_id = payload.get("id").and_then(Value::as_str).map(String::from);

        if let Some(id) = event_id.as_deref() {
            if self.already_seen(id).await {
                info!(event_id = id, "duplicate webhook event, skipping");
                return Ok(());
            }
        }

        match event_type.as_str() {
            "payment.captured" => self.on_payment_captured(&payload).await?,
            "payment.failed" => self.on_payment_failed(&payload).await?,
            "refund.processed" => self.on_refund_processed(&payload).await?,
            other => {
                info!(event_type = other, "ignoring unhandled webhook event");
            }
        }

        if let Some(id) = event_id.as_deref() {
            self.mark_seen(id).await;
        }
        Ok(())
    }

    async fn on_payment_captured(&self, payload: &Value) -> Result<(), ServiceError> {
        let payment = extract_payment(payload)?;
        let Some(model) = self.locate_order(&payment).await? else {
            warn!(payment_id = %payment.id, "captured payment references no known order");
            return Ok(());
        };

        let current = PaymentStatus::parse(&model.payment_status)?;
        if !current.can_transition_to(PaymentStatus::Paid) {
            info!(order_id = %model.id, payment_status = %model.payment_status,
                "order already settled, webhook is a no-op");
            return Ok(());
        }

        let order_id = model.id;
        let txn = self.db.begin().await?;
        let mut active: order::ActiveModel = model.into();
        active.payment_status = Set(PaymentStatus::Paid.as_str().to_string());
        active.payment_id = Set(Some(payment.id.clone()));
        active.updated_at = Set(Some(chrono::Utc::now()));
        let updated = active.update(&txn).await?;

        // A capture landing on a PENDING order also confirms it.
        if OrderStatus::parse(&updated.status)?.can_transition_to(OrderStatus::Confirmed) {
            order_status::apply_order_transition(
                &txn,
                updated,
                OrderStatus::Confirmed,
                Some("payment captured via webhook".into()),
            )
            .await?;
        } else {
            order_status::record_status_history(
                &txn,
                order_id,
                PaymentStatus::Paid.as_str(),
                Some("payment captured via webhook".into()),
            )
            .await?;
        }
        txn.commit().await?;

        self.events
            .send_or_log(Event::PaymentCaptured {
                order_id,
                payment_id: payment.id,
            })
            .await;
        Ok(())
    }

    async fn on_payment_failed(&self, payload: &Value) -> Result<(), ServiceError> {
        let payment = extract_payment(payload)?;
        let Some(model) = self.locate_order(&payment).await? else {
            info!(payment_id = %payment.id, "failed payment references no known order");
            return Ok(());
        };

        let current = PaymentStatus::parse(&model.payment_status)?;
        if !current.can_transition_to(PaymentStatus::Failed) {
            return Ok(());
        }

        let order_id = model.id;
        let txn = self.db.begin().await?;
        let mut active: order::ActiveModel = model.into();
        active.payment_status = Set(PaymentStatus::Failed.as_str().to_string());
        active.updated_at = Set(Some(chrono::Utc::now()));
        active.update(&txn).await?;
        order_status::record_status_history(
            &txn,
            order_id,
            PaymentStatus::Failed.as_str(),
            Some("payment failed via webhook".into()),
        )
        .await?;
        txn.commit().await?;

        self.events
            .send_or_log(Event::PaymentFailed {
                order_id,
                payment_id: payment.id,
            })
            .await;
        Ok(())
    }

    async fn on_refund_processed(&self, payload: &Value) -> Result<(), ServiceError> {
        let refund = extract_refund(payload)?;
        let model = order::Entity::find()
            .filter(order::Column::PaymentId.eq(refund.payment_id.clone()))
            .one(&self.db)
            .await?;
        let Some(model) = model else {
            warn!(payment_id = %refund.payment_id, "refund references no known order");
            return Ok(());
        };

        let current = PaymentStatus::parse(&model.payment_status)?;
        let next = if refund.partial {
            PaymentStatus::PartialRefund
        } else {
            PaymentStatus::Refunded
        };
        if !current.can_transition_to(next) {
            info!(order_id = %model.id, "refund webhook is a no-op in state {}", model.payment_status);
            return Ok(());
        }

        let order_id = model.id;
        let txn = self.db.begin().await?;
        let mut active: order::ActiveModel = model.into();
        active.payment_status = Set(next.as_str().to_string());
        active.updated_at = Set(Some(chrono::Utc::now()));
        active.update(&txn).await?;
        order_status::record_status_history(
            &txn,
            order_id,
            next.as_str(),
            Some(format!("refund {} processed via webhook", refund.id)),
        )
        .await?;
        txn.commit().await?;

        self.events
            .send_or_log(Event::RefundProcessed {
                order_id,
                refund_id: refund.id,
            })
            .await;
        Ok(())
    }

    /// Looks the order up by gateway payment id first, then by the order
    /// number the checkout flow plants in the intent notes.
    async fn locate_order(
        &self,
        payment: &WebhookPayment,
    ) -> Result<Option<order::Model>, ServiceError> {
        let by_payment = order::Entity::find()
            .filter(order::Column::PaymentId.eq(payment.id.clone()))
            .one(&self.db)
            .await?;
        if by_payment.is_some() {
            return Ok(by_payment);
        }

        if let Some(order_number) = &payment.order_number {
            let by_number = order::Entity::find()
                .filter(order::Column::OrderNumber.eq(order_number.clone()))
                .one(&self.db)
                .await?;
            return Ok(by_number);
        }
        Ok(None)
    }

    async fn already_seen(&self, event_id: &str) -> bool {
        match self.cache.exists(&format!("wh:{}", event_id)).await {
            Ok(seen) => seen,
            Err(e) => {
                warn!(event_id = event_id, error = %e, "webhook dedup check failed, processing anyway");
                false
            }
        }
    }

    async fn mark_seen(&self, event_id: &str) {
        if let Err(e) = self
            .cache
            .set(&format!("wh:{}", event_id), "1", Some(DEDUP_TTL))
            .await
        {
            warn!(event_id = event_id, error = %e, "failed to record webhook event id");
        }
    }
}

struct WebhookPayment {
    id: String,
    order_number: Option<String>,
}

struct WebhookRefund {
    id: String,
    payment_id: String,
    partial: bool,
}

fn extract_payment(payload: &Value) -> Result<WebhookPayment, ServiceError> {
    let entity = payload
        .pointer("/payload/payment/entity")
        .ok_or_else(|| ServiceError::ValidationError("webhook missing payment entity".into()))?;
    let id = entity
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| ServiceError::ValidationError("webhook payment has no id".into()))?
        .to_string();
    let order_number = entity
        .pointer("/notes/order_number")
        .and_then(Value::as_str)
        .map(String::from);
    Ok(WebhookPayment { id, order_number })
}

fn extract_refund(payload: &Value) -> Result<WebhookRefund, ServiceError> {
    let entity = payload
        .pointer("/payload/refund/entity")
        .ok_or_else(|| ServiceError::ValidationError("webhook missing refund entity".into()))?;
    let id = entity
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| ServiceError::ValidationError("webhook refund has no id".into()))?
        .to_string();
    let payment_id = entity
        .get("payment_id")
        .and_then(Value::as_str)
        .ok_or_else(|| ServiceError::ValidationError("webhook refund has no payment id".into()))?
        .to_string();
    let partial = entity
        .get("partial")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    Ok(WebhookRefund {
        id,
        payment_id,
        partial,
    })
}
