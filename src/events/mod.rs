use metrics::counter;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{OrderStatus, Platform};

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

    /// Sends an event, logging instead of failing when nobody is listening.
    /// Events are emitted after commit, so a dropped event never undoes a write.
    pub async fn send_or_log(&self, event: Event) {
        let kind = event.kind();
        if let Err(e) = self.send(event).await {
            warn!(event = kind, error = %e, "Domain event was not delivered");
            counter!("order_intake_events_dropped_total", 1, "kind" => kind);
        }
    }
}

/// Domain events published after a successful commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderCreated {
        order_id: Uuid,
        order_number: String,
        customer_id: Uuid,
        platform: Platform,
        total_amount: Decimal,
    },
    CustomerCreated {
        customer_id: Uuid,
        platform: Platform,
    },
    OrderStatusChanged {
        order_id: Uuid,
        order_number: String,
        old_status: OrderStatus,
        new_status: OrderStatus,
        changed_by: String,
    },
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::OrderCreated { .. } => "order_created",
            Event::CustomerCreated { .. } => "customer_created",
            Event::OrderStatusChanged { .. } => "order_status_changed",
        }
    }
}

/// Drains the event channel until every sender is gone.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        handle_event(&event);
    }

    info!("Event channel closed; event processing stopped");
}

fn handle_event(event: &Event) {
    counter!("order_intake_events_total", 1, "kind" => event.kind());

    match event {
        Event::OrderCreated {
            order_id,
            order_number,
            customer_id,
            platform,
            total_amount,
        } => {
            info!(
                %order_id,
                %order_number,
                %customer_id,
                %platform,
                %total_amount,
                "Order created"
            );
            counter!("order_intake_orders_created_total", 1, "platform" => platform.to_string());
        }
        Event::CustomerCreated {
            customer_id,
            platform,
        } => {
            info!(%customer_id, %platform, "Customer created");
        }
        Event::OrderStatusChanged {
            order_id,
            order_number,
            old_status,
            new_status,
            changed_by,
        } => {
            info!(
                %order_id,
                %order_number,
                from = %old_status,
                to = %new_status,
                %changed_by,
                "Order status changed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn processing_stops_when_senders_are_dropped() {
        let (tx, rx) = mpsc::channel(4);
        let sender = EventSender::new(tx);
        let worker = tokio::spawn(process_events(rx));

        sender
            .send(Event::CustomerCreated {
                customer_id: Uuid::new_v4(),
                platform: Platform::Line,
            })
            .await
            .unwrap();
        drop(sender);

        worker.await.unwrap();
    }

    #[tokio::test]
    async fn send_fails_without_receiver() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);

        let result = sender
            .send(Event::CustomerCreated {
                customer_id: Uuid::new_v4(),
                platform: Platform::Web,
            })
            .await;
        assert!(result.is_err());

        // Never panics or errors out to the caller.
        sender
            .send_or_log(Event::CustomerCreated {
                customer_id: Uuid::new_v4(),
                platform: Platform::Web,
            })
            .await;
    }
}
