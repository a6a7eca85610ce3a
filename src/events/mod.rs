use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// The various events that can occur in the checkout workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Order events
    OrderCreated(Uuid),
    OrderPaid(Uuid),
    OrderCancelled(Uuid),

    // Checkout events
    CheckoutCompleted {
        user_id: Uuid,
        order_id: Uuid,
        total: Decimal,
    },
    CheckoutFailed {
        user_id: Uuid,
        reason: String,
    },

    // Stock events
    StockReserved {
        item_id: Uuid,
        location_id: Uuid,
        quantity: i32,
    },
    StockReleased {
        item_id: Uuid,
        location_id: Uuid,
        quantity: i32,
    },
    SaleConfirmed {
        item_id: Uuid,
        location_id: Uuid,
        quantity: i32,
    },
    ReservationExpired {
        reservation_id: Uuid,
        item_id: Uuid,
        quantity: i32,
    },

    // Payment events
    PaymentSucceeded(Uuid),
    PaymentFailed(Uuid),
}

/// Consumes events off the channel; the only subscriber today is the log.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    info!("Event processor started");
    while let Some(event) = receiver.recv().await {
        debug!(?event, "Processing event");
    }
    info!("Event processor stopped");
}
