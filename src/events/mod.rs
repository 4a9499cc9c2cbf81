use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Domain events emitted by the order pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_id: Uuid,
        order_number: String,
    },
    CheckoutSessionCreated {
        order_id: Uuid,
        session_id: String,
    },
    PaymentSucceeded {
        order_id: Uuid,
    },
    PaymentFailed {
        order_id: Uuid,
    },
    StockRestored {
        order_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    },
    OrderStatusChanged {
        order_id: Uuid,
        old_status: String,
        new_status: String,
    },
}

/// Handle for publishing events onto the in-process event channel.
#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event. Event delivery is best-effort; a full or closed
    /// channel is logged and never propagated to the business operation.
    pub async fn send(&self, event: Event) {
        if let Err(e) = self.sender.send(event).await {
            warn!("Failed to publish event: {}", e);
        }
    }
}

/// Creates a connected sender/receiver pair.
pub fn channel(buffer: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(buffer);
    (EventSender::new(tx), rx)
}

/// Background task draining the event channel. Currently events are logged;
/// this is the hook for future outbound consumers.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        match &event {
            Event::OrderCreated {
                order_id,
                order_number,
            } => info!(%order_id, %order_number, "event: order created"),
            Event::CheckoutSessionCreated {
                order_id,
                session_id,
            } => info!(%order_id, %session_id, "event: checkout session created"),
            Event::PaymentSucceeded { order_id } => {
                info!(%order_id, "event: payment succeeded")
            }
            Event::PaymentFailed { order_id } => info!(%order_id, "event: payment failed"),
            Event::StockRestored {
                order_id,
                product_id,
                quantity,
            } => info!(%order_id, %product_id, quantity, "event: stock restored"),
            Event::OrderStatusChanged {
                order_id,
                old_status,
                new_status,
            } => info!(%order_id, %old_status, %new_status, "event: order status changed"),
        }
    }
}
