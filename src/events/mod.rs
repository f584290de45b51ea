use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Events emitted by the checkout pipeline. Emission is best-effort; dropped
/// events are logged and never fail the originating operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderCreated(Uuid),
    OrderCancelled(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
    PaymentCaptured {
        order_id: Uuid,
        payment_id: String,
    },
    PaymentFailed {
        order_id: Uuid,
        payment_id: String,
    },
    RefundProcessed {
        order_id: Uuid,
        refund_id: String,
    },
    StockReserved {
        product_id: Uuid,
        variant_id: Option<Uuid>,
        quantity: i32,
    },
    StockRestored {
        product_id: Uuid,
        variant_id: Option<Uuid>,
        quantity: i32,
    },
    CartCleared(Uuid),
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the channel is closed.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!(error = %e, "event dropped");
        }
    }
}

/// Background consumer that logs events. The channel boundary keeps event
/// handling off the request path.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    while let Some(event) = rx.recv().await {
        match &event {
            Event::OrderCreated(id) => info!(order_id = %id, "order created"),
            Event::OrderCancelled(id) => info!(order_id = %id, "order cancelled"),
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => info!(order_id = %order_id, from = %old_status, to = %new_status, "order status changed"),
            Event::PaymentCaptured {
                order_id,
                payment_id,
            } => info!(order_id = %order_id, payment_id = %payment_id, "payment captured"),
            Event::PaymentFailed {
                order_id,
                payment_id,
            } => info!(order_id = %order_id, payment_id = %payment_id, "payment failed"),
            Event::RefundProcessed {
                order_id,
                refund_id,
            } => info!(order_id = %order_id, refund_id = %refund_id, "refund processed"),
            other => info!(event = ?other, "event"),
        }
    }
    info!("event channel closed, processor exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_or_log_swallows_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);
        // Must not panic or return an error to the caller.
        sender.send_or_log(Event::OrderCreated(Uuid::new_v4())).await;
    }
}
