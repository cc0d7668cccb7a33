//! In-process event channel. Services publish domain events after their
//! transactions commit; a background loop consumes them for logging and
//! follow-up hooks. Delivery is best-effort: a full or closed channel is
//! logged, never propagated to the caller's result.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

/// Stock level below which the processing loop raises a low-inventory warning.
const LOW_STOCK_THRESHOLD: i32 = 10;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Event {
    ProductCreated(Uuid),
    OrderCreated(Uuid),
    SessionCreated {
        session_id: Uuid,
        store_id: Uuid,
        code: String,
    },
    PickingFinished {
        session_id: Uuid,
    },
    SessionCompleted(Uuid),
    SessionAbandoned(Uuid),
    OrderReadyToShip(Uuid),
    OrderCancelled(Uuid),
    OrderPurged(Uuid),
    StockDecremented {
        product_id: Uuid,
        order_id: Uuid,
        quantity: i32,
        stock_after: i32,
    },
    StockRestored {
        product_id: Uuid,
        order_id: Uuid,
        quantity: i32,
        stock_after: i32,
        reason: String,
    },
}

/// Cloneable handle for publishing events onto the shared channel.
#[derive(Clone, Debug)]
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
}

/// Consumes events until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match event {
            Event::StockDecremented {
                product_id,
                order_id,
                quantity,
                stock_after,
            } => {
                info!(
                    %product_id, %order_id, quantity, stock_after,
                    "stock decremented"
                );
                if stock_after < LOW_STOCK_THRESHOLD {
                    warn!(
                        %product_id, stock_after,
                        "low inventory after reservation"
                    );
                }
            }
            Event::StockRestored {
                product_id,
                order_id,
                quantity,
                stock_after,
                ref reason,
            } => {
                info!(
                    %product_id, %order_id, quantity, stock_after, reason,
                    "stock restored"
                );
            }
            Event::SessionCreated {
                session_id,
                store_id,
                ref code,
            } => {
                info!(%session_id, %store_id, code, "fulfillment session created");
            }
            Event::OrderReadyToShip(order_id) => {
                info!(%order_id, "order ready to ship");
            }
            Event::OrderPurged(order_id) => {
                info!(%order_id, "order hard-deleted");
            }
            other => {
                info!(event = ?other, "event processed");
            }
        }
    }

    warn!("Event processing loop has ended");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_delivers_to_receiver() {
        let (tx, mut rx) = mpsc::channel(4);
        let sender = EventSender::new(tx);

        let order_id = Uuid::new_v4();
        sender.send(Event::OrderReadyToShip(order_id)).await.unwrap();

        match rx.recv().await {
            Some(Event::OrderReadyToShip(id)) => assert_eq!(id, order_id),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn send_fails_when_receiver_dropped() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let sender = EventSender::new(tx);
        let result = sender.send(Event::OrderCreated(Uuid::new_v4())).await;
        assert!(result.is_err());
    }
}
