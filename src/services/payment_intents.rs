//! Payment Intent Broker: creates gateway payment intents and holds the
//! validated cart snapshot server-side until the payment round-trip returns.
//!
//! Intent records live only in the cache, keyed `intent:{id}` with a TTL.
//! `consume_intent` deletes the record as it reads it, so a double-submitted
//! payment sees `NotFound` on the second attempt. A record lost to expiry or
//! eviction fails the order the same way; the gateway payment is the
//! authoritative artifact and reconciliation catches the money side.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::cache::CacheBackend;
use crate::errors::ServiceError;
use crate::gateway::{CreateIntentRequest, PaymentGateway};
use crate::models::{CartSnapshot, IntentHandle, PaymentIntentRecord};

fn intent_key(intent_id: &str) -> String {
    format!("intent:{}", intent_id)
}

pub struct PaymentIntentBroker {
    gateway: Arc<dyn PaymentGateway>,
    cache: Arc<dyn CacheBackend>,
    ttl: Duration,
}

impl PaymentIntentBroker {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        cache: Arc<dyn CacheBackend>,
        ttl: Duration,
    ) -> Self {
        Self { gateway, cache, ttl }
    }

    /// Creates a gateway intent for the snapshot total and stashes the
    /// snapshot under the intent id. The caller must have validated the
    /// snapshot first; this layer only converts and stores.
    #[instrument(skip(self, snapshot), fields(user_id = %user_id))]
    pub async fn create_intent(
        &self,
        user_id: Uuid,
        snapshot: CartSnapshot,
    ) -> Result<IntentHandle, ServiceError> {
        let amount_minor = to_minor_units(snapshot.total)?;
        let receipt = format!("rcpt_{}", Uuid::new_v4().simple());

        let intent = self
            .gateway
            .create_intent(CreateIntentRequest {
                amount: amount_minor,
                currency: snapshot.currency.clone(),
                receipt,
                notes: json!({ "user_id": user_id.to_string() }),
            })
            .await?;

        let now = Utc::now();
        let record = PaymentIntentRecord {
            user_id,
            snapshot,
            created_at: now,
            expires_at: now + chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::hours(1)),
        };
        let payload = serde_json::to_string(&record)?;
        self.cache
            .set(&intent_key(&intent.id), &payload, Some(self.ttl))
            .await
            .map_err(|e| ServiceError::CacheError(e.to_string()))?;

        info!(intent_id = %intent.id, amount = amount_minor, "payment intent created");
        Ok(IntentHandle {
            intent_id: intent.id,
            amount_minor,
            currency: intent.currency,
            expires_at: record.expires_at,
        })
    }

    /// Atomically takes the snapshot held for an intent. Read-once: of any
    /// number of concurrent calls for the same intent, exactly one sees the
    /// record and the rest get `NotFound`.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn consume_intent(
        &self,
        intent_id: &str,
        user_id: Uuid,
    ) -> Result<PaymentIntentRecord, ServiceError> {
        let key = intent_key(intent_id);
        let payload = self
            .cache
            .take(&key)
            .await
            .map_err(|e| ServiceError::CacheError(e.to_string()))?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("payment intent {} not found or expired", intent_id))
            })?;

        let record: PaymentIntentRecord = serde_json::from_str(&payload)?;
        if record.user_id != user_id {
            return Err(ServiceError::Unauthorized(
                "payment intent belongs to another user".into(),
            ));
        }
        if record.expires_at < Utc::now() {
            return Err(ServiceError::NotFound(format!(
                "payment intent {} has expired",
                intent_id
            )));
        }
        Ok(record)
    }
}

/// Converts a major-unit decimal amount to integer minor units (e.g. 12.34
/// to 1234). Fails on amounts that do not land on a minor unit.
fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    if amount <= Decimal::ZERO {
        return Err(ServiceError::ValidationError(
            "payment amount must be positive".into(),
        ));
    }
    let minor = (amount * dec!(100)).round();
    minor.to_i64().ok_or_else(|| {
        ServiceError::ValidationError(format!("amount {} out of range", amount))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheError, InMemoryCache};
    use crate::gateway::{GatewayIntent, GatewayPayment};
    use crate::models::SnapshotItem;
    use async_trait::async_trait;

    #[test]
    fn converts_major_to_minor_units() {
        assert_eq!(to_minor_units(dec!(12.34)).unwrap(), 1234);
        assert_eq!(to_minor_units(dec!(100)).unwrap(), 10000);
        assert!(to_minor_units(dec!(0)).is_err());
        assert!(to_minor_units(dec!(-5)).is_err());
    }

    struct StubGateway;

    #[async_trait]
    impl PaymentGateway for StubGateway {
        async fn create_intent(
            &self,
            req: CreateIntentRequest,
        ) -> Result<GatewayIntent, ServiceError> {
            Ok(GatewayIntent {
                id: "intent_1".to_string(),
                amount: req.amount,
                currency: req.currency,
            })
        }

        async fn fetch_payment(&self, payment_id: &str) -> Result<GatewayPayment, ServiceError> {
            Ok(GatewayPayment {
                id: payment_id.to_string(),
                order_id: None,
                status: "captured".to_string(),
                amount: 0,
            })
        }
    }

    /// Yields to the scheduler before every operation, the way a networked
    /// backend suspends on each command.
    struct SuspendingCache(InMemoryCache);

    #[async_trait]
    impl CacheBackend for SuspendingCache {
        async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
            tokio::task::yield_now().await;
            self.0.get(key).await
        }
        async fn set(
            &self,
            key: &str,
            value: &str,
            ttl: Option<std::time::Duration>,
        ) -> Result<(), CacheError> {
            tokio::task::yield_now().await;
            self.0.set(key, value, ttl).await
        }
        async fn delete(&self, key: &str) -> Result<(), CacheError> {
            tokio::task::yield_now().await;
            self.0.delete(key).await
        }
        async fn exists(&self, key: &str) -> Result<bool, CacheError> {
            tokio::task::yield_now().await;
            self.0.exists(key).await
        }
        async fn take(&self, key: &str) -> Result<Option<String>, CacheError> {
            tokio::task::yield_now().await;
            self.0.take(key).await
        }
    }

    fn snapshot() -> CartSnapshot {
        CartSnapshot {
            items: vec![SnapshotItem {
                product_id: Uuid::new_v4(),
                variant_id: None,
                quantity: 1,
                unit_price: dec!(10.00),
            }],
            subtotal: dec!(10.00),
            discount: Decimal::ZERO,
            tax: Decimal::ZERO,
            total: dec!(10.00),
            currency: "USD".to_string(),
            coupon_code: None,
            shipping_address_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn concurrent_consumes_hand_out_the_record_once() {
        let broker = Arc::new(PaymentIntentBroker::new(
            Arc::new(StubGateway),
            Arc::new(SuspendingCache(InMemoryCache::new())),
            Duration::from_secs(60),
        ));
        let user_id = Uuid::new_v4();
        let handle = broker.create_intent(user_id, snapshot()).await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let broker = broker.clone();
            let intent_id = handle.intent_id.clone();
            tasks.push(tokio::spawn(async move {
                broker.consume_intent(&intent_id, user_id).await
            }));
        }

        let mut consumed = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => consumed += 1,
                Err(ServiceError::NotFound(_)) => {}
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!(consumed, 1);
    }

    #[tokio::test]
    async fn consume_is_read_once_sequentially_too() {
        let broker = PaymentIntentBroker::new(
            Arc::new(StubGateway),
            Arc::new(InMemoryCache::new()),
            Duration::from_secs(60),
        );
        let user_id = Uuid::new_v4();
        let handle = broker.create_intent(user_id, snapshot()).await.unwrap();

        broker.consume_intent(&handle.intent_id, user_id).await.unwrap();
        let err = broker
            .consume_intent(&handle.intent_id, user_id)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }
}
