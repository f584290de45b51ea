//! Shared test harness: in-memory sqlite schema, seeded catalog rows, a
//! recording mock gateway, and a fully wired service stack.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, EntityTrait, Schema, Set,
};
use tokio::sync::mpsc;
use uuid::Uuid;

use storefront_api::cache::{CacheBackend, InMemoryCache};
use storefront_api::entities::{
    cart, cart_item, coupon, order, order_item, order_status_history, product, product_variant,
};
use storefront_api::errors::ServiceError;
use storefront_api::events::EventSender;
use storefront_api::gateway::{CreateIntentRequest, GatewayIntent, GatewayPayment, PaymentGateway};
use storefront_api::models::{CartSnapshot, SnapshotItem};
use storefront_api::services::checkout::CheckoutService;
use storefront_api::services::orders::OrderService;
use storefront_api::services::payment_intents::PaymentIntentBroker;
use storefront_api::services::reconciliation::WebhookReconciler;
use storefront_api::services::signatures::SignatureVerifier;

pub const PAYMENT_SECRET: &str = "test-gateway-key-secret";
pub const WEBHOOK_SECRET: &str = "test-webhook-secret";

pub async fn setup_db() -> DatabaseConnection {
    let mut opts = ConnectOptions::new("sqlite::memory:".to_string());
    opts.max_connections(1).min_connections(1);
    let db = Database::connect(opts).await.expect("sqlite connect");

    let schema = Schema::new(db.get_database_backend());
    create_table(&db, &schema, product::Entity).await;
    create_table(&db, &schema, product_variant::Entity).await;
    create_table(&db, &schema, order::Entity).await;
    create_table(&db, &schema, order_item::Entity).await;
    create_table(&db, &schema, order_status_history::Entity).await;
    create_table(&db, &schema, coupon::Entity).await;
    create_table(&db, &schema, cart::Entity).await;
    create_table(&db, &schema, cart_item::Entity).await;
    db
}

async fn create_table<E: EntityTrait>(db: &DatabaseConnection, schema: &Schema, entity: E) {
    let stmt = schema.create_table_from_entity(entity);
    db.execute(db.get_database_backend().build(&stmt))
        .await
        .expect("create table");
}

/// Gateway double. Hands out deterministic intent ids and lets tests control
/// the status reported for fetched payments.
#[derive(Default)]
pub struct MockGateway {
    pub created: Mutex<Vec<CreateIntentRequest>>,
    pub payment_status: Mutex<String>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            created: Mutex::new(Vec::new()),
            payment_status: Mutex::new("captured".to_string()),
        }
    }

    pub fn set_payment_status(&self, status: &str) {
        *self.payment_status.lock().unwrap() = status.to_string();
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_intent(
        &self,
        request: CreateIntentRequest,
    ) -> Result<GatewayIntent, ServiceError> {
        let amount = request.amount;
        let currency = request.currency.clone();
        let mut created = self.created.lock().unwrap();
        created.push(request);
        Ok(GatewayIntent {
            id: format!("intent_{}", created.len()),
            amount,
            currency,
        })
    }

    async fn fetch_payment(&self, payment_id: &str) -> Result<GatewayPayment, ServiceError> {
        let created = self.created.lock().unwrap();
        let amount = created.last().map(|c| c.amount).unwrap_or(0);
        Ok(GatewayPayment {
            id: payment_id.to_string(),
            order_id: None,
            status: self.payment_status.lock().unwrap().clone(),
            amount,
        })
    }
}

/// Everything a checkout test needs, wired the way the binary wires it.
pub struct TestApp {
    pub db: DatabaseConnection,
    pub cache: Arc<dyn CacheBackend>,
    pub gateway: Arc<MockGateway>,
    pub signatures: Arc<SignatureVerifier>,
    pub checkout: CheckoutService,
    pub orders: OrderService,
    pub reconciler: WebhookReconciler,
}

impl TestApp {
    pub async fn new() -> Self {
        let db = setup_db().await;
        let cache: Arc<dyn CacheBackend> = Arc::new(InMemoryCache::new());
        let gateway = Arc::new(MockGateway::new());
        let signatures = Arc::new(SignatureVerifier::new(
            PAYMENT_SECRET.to_string(),
            WEBHOOK_SECRET.to_string(),
        ));
        let broker = Arc::new(PaymentIntentBroker::new(
            gateway.clone() as Arc<dyn PaymentGateway>,
            cache.clone(),
            Duration::from_secs(3600),
        ));
        let (tx, mut rx) = mpsc::channel(64);
        tokio::spawn(async move { while rx.recv().await.is_some() {} });
        let events = EventSender::new(tx);

        let checkout = CheckoutService::new(
            db.clone(),
            broker,
            gateway.clone() as Arc<dyn PaymentGateway>,
            signatures.clone(),
            events.clone(),
        );
        let orders = OrderService::new(db.clone());
        let reconciler = WebhookReconciler::new(db.clone(), cache.clone(), events);

        Self {
            db,
            cache,
            gateway,
            signatures,
            checkout,
            orders,
            reconciler,
        }
    }

    pub fn sign_payment(&self, intent_id: &str, payment_id: &str) -> String {
        self.signatures.payment_signature(intent_id, payment_id)
    }

    pub fn sign_webhook(&self, body: &[u8]) -> String {
        self.signatures.webhook_signature(body)
    }
}

pub async fn seed_product(
    db: &DatabaseConnection,
    price: Decimal,
    available_quantity: i32,
) -> product::Model {
    let id = Uuid::new_v4();
    let row = product::ActiveModel {
        id: Set(id),
        sku: Set(format!("SKU-{}", Uuid::new_v4().simple())),
        name: Set("Walnut Desk".to_string()),
        description: Set(None),
        price: Set(price),
        sale_price: Set(None),
        currency: Set("USD".to_string()),
        is_active: Set(true),
        available_quantity: Set(available_quantity),
        low_stock_threshold: Set(2),
        created_at: Set(Utc::now()),
        updated_at: Set(Utc::now()),
    };
    product::Entity::insert(row)
        .exec(db)
        .await
        .expect("insert product");
    product::Entity::find_by_id(id)
        .one(db)
        .await
        .expect("load product")
        .expect("product present")
}

pub async fn seed_variant(
    db: &DatabaseConnection,
    product_id: Uuid,
    price: Option<Decimal>,
    available_quantity: i32,
) -> product_variant::Model {
    let id = Uuid::new_v4();
    let row = product_variant::ActiveModel {
        id: Set(id),
        product_id: Set(product_id),
        sku: Set(format!("VAR-{}", id.simple())),
        name: Set("Oiled Finish".to_string()),
        price: Set(price),
        is_active: Set(true),
        available_quantity: Set(available_quantity),
        low_stock_threshold: Set(2),
        created_at: Set(Utc::now()),
        updated_at: Set(Utc::now()),
    };
    product_variant::Entity::insert(row)
        .exec(db)
        .await
        .expect("insert variant");
    product_variant::Entity::find_by_id(id)
        .one(db)
        .await
        .expect("load variant")
        .expect("variant present")
}

pub async fn seed_coupon(
    db: &DatabaseConnection,
    code: &str,
    discount_type: &str,
    discount_value: Decimal,
    usage_limit: i32,
    per_user_limit: i32,
) -> coupon::Model {
    let id = Uuid::new_v4();
    let row = coupon::ActiveModel {
        id: Set(id),
        code: Set(code.to_string()),
        discount_type: Set(discount_type.to_string()),
        discount_value: Set(discount_value),
        usage_limit: Set(usage_limit),
        usage_count: Set(0),
        per_user_limit: Set(per_user_limit),
        valid_from: Set(Utc::now() - chrono::Duration::days(1)),
        valid_until: Set(Utc::now() + chrono::Duration::days(30)),
        is_active: Set(true),
        created_at: Set(Utc::now()),
        updated_at: Set(Utc::now()),
    };
    coupon::Entity::insert(row)
        .exec(db)
        .await
        .expect("insert coupon");
    coupon::Entity::find_by_id(id)
        .one(db)
        .await
        .expect("load coupon")
        .expect("coupon present")
}

pub async fn seed_cart(
    db: &DatabaseConnection,
    customer_id: Uuid,
    items: &[(Uuid, Option<Uuid>, i32, Decimal)],
) -> cart::Model {
    let cart_id = Uuid::new_v4();
    let row = cart::ActiveModel {
        id: Set(cart_id),
        customer_id: Set(customer_id),
        currency: Set("USD".to_string()),
        status: Set(cart::CartStatus::Active),
        created_at: Set(Utc::now()),
        updated_at: Set(Utc::now()),
    };
    cart::Entity::insert(row).exec(db).await.expect("insert cart");

    for (product_id, variant_id, quantity, unit_price) in items {
        let item = cart_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            cart_id: Set(cart_id),
            product_id: Set(*product_id),
            variant_id: Set(*variant_id),
            quantity: Set(*quantity),
            unit_price: Set(*unit_price),
            created_at: Set(Utc::now()),
        };
        cart_item::Entity::insert(item)
            .exec(db)
            .await
            .expect("insert cart item");
    }

    cart::Entity::find_by_id(cart_id)
        .one(db)
        .await
        .expect("load cart")
        .expect("cart present")
}

/// Builds a price-consistent single-product snapshot.
pub fn snapshot_for(product: &product::Model, quantity: i32) -> CartSnapshot {
    let unit_price = product.sale_price.unwrap_or(product.price);
    let subtotal = unit_price * Decimal::from(quantity);
    CartSnapshot {
        items: vec![SnapshotItem {
            product_id: product.id,
            variant_id: None,
            quantity,
            unit_price,
        }],
        subtotal,
        discount: Decimal::ZERO,
        tax: Decimal::ZERO,
        total: subtotal,
        currency: "USD".to_string(),
        coupon_code: None,
        shipping_address_id: Uuid::new_v4(),
    }
}
