//! services/api/src/events.rs
//!
//! The live operations feed: an in-process broadcast of order events that the
//! staff dashboard streams over SSE. Publishing never blocks; a subscriber that
//! falls behind loses the oldest events.

use bar_bot_core::domain::Order;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::broadcast;
use utoipa::ToSchema;
use uuid::Uuid;

const FEED_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct EventItem {
    pub name: String,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum OpsEvent {
    NewOrder {
        order_id: Uuid,
        pickup_code: String,
        #[schema(value_type = String)]
        total_amount: Decimal,
        items: Vec<EventItem>,
    },
    OrderReady {
        order_id: Uuid,
        pickup_code: String,
        actor: Option<String>,
    },
    OrderCompleted {
        order_id: Uuid,
        pickup_code: String,
        actor: Option<String>,
    },
    OrderFailed {
        order_id: Uuid,
        reason: String,
    },
}

impl OpsEvent {
    /// The SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            OpsEvent::NewOrder { .. } => "new_order",
            OpsEvent::OrderReady { .. } => "order_ready",
            OpsEvent::OrderCompleted { .. } => "order_completed",
            OpsEvent::OrderFailed { .. } => "order_failed",
        }
    }

    pub fn new_order(order: &Order) -> Self {
        OpsEvent::NewOrder {
            order_id: order.id,
            pickup_code: order.pickup_code.clone(),
            total_amount: order.total_amount,
            items: order
                .items
                .iter()
                .map(|item| EventItem {
                    name: item.product_name.clone(),
                    quantity: item.quantity,
                })
                .collect(),
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<OpsEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(FEED_CAPACITY);
        Self { sender }
    }

    /// Publishes to every current subscriber. Having none is not an error.
    pub fn publish(&self, event: OpsEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<OpsEvent> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::new();
        let mut feed = bus.subscribe();
        let order_id = Uuid::new_v4();
        bus.publish(OpsEvent::OrderFailed {
            order_id,
            reason: "payment failed".to_string(),
        });
        let event = feed.recv().await.unwrap();
        assert_eq!(event.name(), "order_failed");
    }

    #[test]
    fn publishing_without_subscribers_is_fine() {
        let bus = EventBus::new();
        bus.publish(OpsEvent::OrderReady {
            order_id: Uuid::new_v4(),
            pickup_code: "0420".to_string(),
            actor: None,
        });
    }

    #[test]
    fn events_serialize_with_type_and_data() {
        let event = OpsEvent::OrderCompleted {
            order_id: Uuid::nil(),
            pickup_code: "0420".to_string(),
            actor: Some("staff".to_string()),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "order_completed");
        assert_eq!(json["data"]["pickup_code"], "0420");
    }
}
