//! Order and payment status machines. Statuses are stored as plain strings
//! on the order row; these enums are the only place transition rules live.

use sea_orm::{ActiveModelTrait, ConnectionTrait, EntityTrait, Set};
use tracing::instrument;
use uuid::Uuid;

use crate::entities::{order, order_status_history};
use crate::errors::ServiceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Pending,
    Confirmed,
    Processing,
    Shipped,
    OutForDelivery,
    Delivered,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Confirmed => "CONFIRMED",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Shipped => "SHIPPED",
            OrderStatus::OutForDelivery => "OUT_FOR_DELIVERY",
            OrderStatus::Delivered => "DELIVERED",
            OrderStatus::Cancelled => "CANCELLED",
            OrderStatus::Refunded => "REFUNDED",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ServiceError> {
        match s {
            "PENDING" => Ok(OrderStatus::Pending),
            "CONFIRMED" => Ok(OrderStatus::Confirmed),
            "PROCESSING" => Ok(OrderStatus::Processing),
            "SHIPPED" => Ok(OrderStatus::Shipped),
            "OUT_FOR_DELIVERY" => Ok(OrderStatus::OutForDelivery),
            "DELIVERED" => Ok(OrderStatus::Delivered),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            "REFUNDED" => Ok(OrderStatus::Refunded),
            other => Err(ServiceError::InternalError(format!(
                "unknown order status {}",
                other
            ))),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Delivered | OrderStatus::Cancelled | OrderStatus::Refunded
        )
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        match (self, next) {
            (Pending, Confirmed) | (Pending, Cancelled) => true,
            (Confirmed, Processing) | (Confirmed, Cancelled) => true,
            (Processing, Shipped) => true,
            (Shipped, OutForDelivery) | (Shipped, Delivered) => true,
            (OutForDelivery, Delivered) => true,
            // Refunds can land at any point after the order was paid for.
            (Confirmed, Refunded)
            | (Processing, Refunded)
            | (Shipped, Refunded)
            | (OutForDelivery, Refunded)
            | (Delivered, Refunded) => true,
            _ => false,
        }
    }

    /// Whether a customer cancellation is still allowed from this state.
    /// Once fulfilment starts the order can only be refunded, not cancelled.
    pub fn is_cancellable(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::Confirmed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
    PartialRefund,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Paid => "PAID",
            PaymentStatus::Failed => "FAILED",
            PaymentStatus::Refunded => "REFUNDED",
            PaymentStatus::PartialRefund => "PARTIAL_REFUND",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ServiceError> {
        match s {
            "PENDING" => Ok(PaymentStatus::Pending),
            "PAID" => Ok(PaymentStatus::Paid),
            "FAILED" => Ok(PaymentStatus::Failed),
            "REFUNDED" => Ok(PaymentStatus::Refunded),
            "PARTIAL_REFUND" => Ok(PaymentStatus::PartialRefund),
            other => Err(ServiceError::InternalError(format!(
                "unknown payment status {}",
                other
            ))),
        }
    }

    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        match (self, next) {
            (Pending, Paid) | (Pending, Failed) => true,
            (Paid, Refunded) | (Paid, PartialRefund) => true,
            (PartialRefund, Refunded) | (PartialRefund, PartialRefund) => true,
            _ => false,
        }
    }
}

/// Applies an order status transition inside the caller's connection scope,
/// appending a history row and bumping the order version.
#[instrument(skip(conn, order), fields(order_id = %order.id))]
pub async fn apply_order_transition<C: ConnectionTrait>(
    conn: &C,
    order: order::Model,
    next: OrderStatus,
    notes: Option<String>,
) -> Result<order::Model, ServiceError> {
    let current = OrderStatus::parse(&order.status)?;
    if !current.can_transition_to(next) {
        return Err(ServiceError::InvalidOperation(format!(
            "cannot move order from {} to {}",
            current.as_str(),
            next.as_str()
        )));
    }

    let order_id = order.id;
    let new_version = order.version + 1;
    let mut active: order::ActiveModel = order.into();
    active.status = Set(next.as_str().to_string());
    active.version = Set(new_version);
    active.updated_at = Set(Some(chrono::Utc::now()));
    let updated = active.update(conn).await?;

    record_status_history(conn, order_id, next.as_str(), notes).await?;
    Ok(updated)
}

pub async fn record_status_history<C: ConnectionTrait>(
    conn: &C,
    order_id: Uuid,
    status: &str,
    notes: Option<String>,
) -> Result<(), ServiceError> {
    let row = order_status_history::ActiveModel {
        id: Set(Uuid::new_v4()),
        order_id: Set(order_id),
        status: Set(status.to_string()),
        notes: Set(notes),
        created_at: Set(chrono::Utc::now()),
    };
    order_status_history::Entity::insert(row).exec(conn).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_transitions_follow_lifecycle() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Confirmed));
        assert!(OrderStatus::Confirmed.can_transition_to(OrderStatus::Cancelled));
        assert!(!OrderStatus::Shipped.can_transition_to(OrderStatus::Cancelled));
        assert!(!OrderStatus::Cancelled.can_transition_to(OrderStatus::Confirmed));
        assert!(OrderStatus::Delivered.can_transition_to(OrderStatus::Refunded));
    }

    #[test]
    fn cancellation_window_closes_when_fulfilment_starts() {
        assert!(OrderStatus::Pending.is_cancellable());
        assert!(OrderStatus::Confirmed.is_cancellable());
        assert!(!OrderStatus::Processing.is_cancellable());
        assert!(!OrderStatus::Processing.can_transition_to(OrderStatus::Cancelled));
        assert!(!OrderStatus::Shipped.is_cancellable());
    }

    #[test]
    fn refunds_are_reachable_from_every_paid_state() {
        for state in [
            OrderStatus::Confirmed,
            OrderStatus::Processing,
            OrderStatus::Shipped,
            OrderStatus::OutForDelivery,
            OrderStatus::Delivered,
        ] {
            assert!(state.can_transition_to(OrderStatus::Refunded));
        }
        assert!(!OrderStatus::Pending.can_transition_to(OrderStatus::Refunded));
        assert!(!OrderStatus::Cancelled.can_transition_to(OrderStatus::Refunded));
    }

    #[test]
    fn payment_transitions_are_one_way() {
        assert!(PaymentStatus::Pending.can_transition_to(PaymentStatus::Paid));
        assert!(!PaymentStatus::Paid.can_transition_to(PaymentStatus::Paid));
        assert!(!PaymentStatus::Failed.can_transition_to(PaymentStatus::Paid));
        assert!(PaymentStatus::Paid.can_transition_to(PaymentStatus::PartialRefund));
    }

    #[test]
    fn parse_round_trips() {
        for s in [
            "PENDING",
            "CONFIRMED",
            "PROCESSING",
            "SHIPPED",
            "OUT_FOR_DELIVERY",
            "DELIVERED",
            "CANCELLED",
            "REFUNDED",
        ] {
            assert_eq!(OrderStatus::parse(s).unwrap().as_str(), s);
        }
    }
}
