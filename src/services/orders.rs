//! Read-side order queries and the response shapes handlers return.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder};
use serde::{Deserialize, Serialize};
use tracing::instrument;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::{order, order_item};
use crate::errors::ServiceError;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderItemResponse {
    pub product_id: Uuid,
    pub variant_id: Option<Uuid>,
    pub name: String,
    pub quantity: i32,
    pub price_at_purchase: Decimal,
    pub line_total: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub order_number: String,
    pub customer_id: Uuid,
    pub status: String,
    pub payment_status: String,
    pub subtotal: Decimal,
    pub discount_amount: Decimal,
    pub tax_amount: Decimal,
    pub total_amount: Decimal,
    pub currency: String,
    pub payment_method: String,
    pub payment_id: Option<String>,
    pub coupon_code: Option<String>,
    pub items: Vec<OrderItemResponse>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

pub fn model_to_response(model: order::Model, items: Vec<order_item::Model>) -> OrderResponse {
    OrderResponse {
        id: model.id,
        order_number: model.order_number,
        customer_id: model.customer_id,
        status: model.status,
        payment_status: model.payment_status,
        subtotal: model.subtotal,
        discount_amount: model.discount_amount,
        tax_amount: model.tax_amount,
        total_amount: model.total_amount,
        currency: model.currency,
        payment_method: model.payment_method,
        payment_id: model.payment_id,
        coupon_code: model.coupon_code,
        items: items
            .into_iter()
            .map(|i| OrderItemResponse {
                product_id: i.product_id,
                variant_id: i.variant_id,
                name: i.name,
                quantity: i.quantity,
                price_at_purchase: i.price_at_purchase,
                line_total: i.line_total,
            })
            .collect(),
        created_at: model.created_at,
        updated_at: model.updated_at,
    }
}

#[derive(Debug, Clone)]
pub struct OrderService {
    db: DbPool,
}

impl OrderService {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    /// Lists a customer's orders, newest first.
    #[instrument(skip(self), fields(customer_id = %customer_id))]
    pub async fn list_orders(
        &self,
        customer_id: Uuid,
        page: u64,
        per_page: u64,
    ) -> Result<(Vec<OrderResponse>, u64), ServiceError> {
        let per_page = per_page.clamp(1, 100);
        let paginator = order::Entity::find()
            .filter(order::Column::CustomerId.eq(customer_id))
            .order_by_desc(order::Column::CreatedAt)
            .paginate(&self.db, per_page);

        let total = paginator.num_items().await?;
        let models = paginator.fetch_page(page.saturating_sub(1)).await?;

        let mut responses = Vec::with_capacity(models.len());
        for model in models {
            let items = order_item::Entity::find()
                .filter(order_item::Column::OrderId.eq(model.id))
                .all(&self.db)
                .await?;
            responses.push(model_to_response(model, items));
        }
        Ok((responses, total))
    }

    /// Fetches one order with its line items, enforcing ownership.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn get_order(
        &self,
        order_id: Uuid,
        customer_id: Uuid,
    ) -> Result<OrderResponse, ServiceError> {
        let model = order::Entity::find_by_id(order_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("order {} not found", order_id)))?;
        if model.customer_id != customer_id {
            return Err(ServiceError::NotFound(format!("order {} not found", order_id)));
        }
        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(model.id))
            .all(&self.db)
            .await?;
        Ok(model_to_response(model, items))
    }
}
