//! services/api/src/engine/followup.rs
//!
//! One delayed "still waiting for payment" nudge per dispatched order. The
//! nudge re-reads the order once after the delay and only speaks up if it is
//! still PENDING. A resolved payment webhook cancels it.

use bar_bot_core::catalog::format_kes;
use bar_bot_core::domain::{Button, OrderStatus};
use bar_bot_core::phone::mask;
use bar_bot_core::ports::{ChatGateway, OrderRepository};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const RETRY_PAYMENT_PREFIX: &str = "retry_pay_";

#[derive(Clone)]
pub struct FollowUpScheduler {
    delay: Duration,
    orders: Arc<dyn OrderRepository>,
    chat: Arc<dyn ChatGateway>,
    scheduled: Arc<Mutex<HashMap<Uuid, (u64, CancellationToken)>>>,
    generation: Arc<AtomicU64>,
}

impl FollowUpScheduler {
    pub fn new(
        delay: Duration,
        orders: Arc<dyn OrderRepository>,
        chat: Arc<dyn ChatGateway>,
    ) -> Self {
        Self {
            delay,
            orders,
            chat,
            scheduled: Arc::new(Mutex::new(HashMap::new())),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Schedules the nudge for `order_id`, replacing any earlier one for it.
    pub fn schedule(&self, order_id: Uuid, chat_phone: &str) {
        let token = CancellationToken::new();
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        {
            let mut scheduled = self.scheduled.lock().unwrap_or_else(|e| e.into_inner());
            if let Some((_, previous)) = scheduled.insert(order_id, (generation, token.clone())) {
                previous.cancel();
            }
        }

        let this = self.clone();
        let chat_phone = chat_phone.to_string();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    debug!(%order_id, "Payment follow-up cancelled");
                    return;
                }
                _ = tokio::time::sleep(this.delay) => {}
            }
            this.forget(order_id, generation);
            this.nudge(order_id, &chat_phone).await;
        });
    }

    /// Cancels a scheduled nudge. Unknown ids are ignored.
    pub fn cancel(&self, order_id: Uuid) {
        let mut scheduled = self.scheduled.lock().unwrap_or_else(|e| e.into_inner());
        if let Some((_, token)) = scheduled.remove(&order_id) {
            token.cancel();
        }
    }

    fn forget(&self, order_id: Uuid, generation: u64) {
        let mut scheduled = self.scheduled.lock().unwrap_or_else(|e| e.into_inner());
        if matches!(scheduled.get(&order_id), Some((g, _)) if *g == generation) {
            scheduled.remove(&order_id);
        }
    }

    async fn nudge(&self, order_id: Uuid, chat_phone: &str) {
        let order = match self.orders.get_order(order_id).await {
            Ok(order) => order,
            Err(e) => {
                warn!(%order_id, error = %e, "Could not load order for payment follow-up");
                return;
            }
        };
        if order.status != OrderStatus::Pending {
            debug!(%order_id, status = %order.status, "Order settled; no follow-up needed");
            return;
        }

        let text = format!(
            "⏳ Still waiting for your M-PESA payment of {} for order #{}.\n\n\
             Didn't get the prompt? Tap below to send it again.",
            format_kes(order.total_amount),
            order.short_id()
        );
        let buttons = [Button::new(
            format!("{RETRY_PAYMENT_PREFIX}{order_id}"),
            "Retry Payment",
        )];
        match self.chat.send_buttons(chat_phone, &text, &buttons).await {
            Ok(()) => info!(%order_id, phone = %mask(chat_phone), "Sent payment follow-up"),
            Err(e) => warn!(%order_id, error = %e, "Failed to send payment follow-up"),
        }
    }

    #[cfg(test)]
    pub(crate) fn is_scheduled(&self, order_id: Uuid) -> bool {
        self.scheduled
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&order_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{pending_order, InMemoryOrders, RecordingChat};

    fn scheduler(orders: Arc<InMemoryOrders>, chat: Arc<RecordingChat>) -> FollowUpScheduler {
        FollowUpScheduler::new(Duration::from_secs(45), orders, chat)
    }

    #[tokio::test(start_paused = true)]
    async fn nudges_once_when_still_pending() {
        let orders = Arc::new(InMemoryOrders::default());
        let chat = Arc::new(RecordingChat::default());
        let order = pending_order("254711000001");
        orders.insert(order.clone());

        let follow_ups = scheduler(orders.clone(), chat.clone());
        follow_ups.schedule(order.id, "254711000001");

        tokio::time::sleep(Duration::from_secs(44)).await;
        assert!(chat.sent().is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        let sent = chat.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].buttons[0].id, format!("retry_pay_{}", order.id));
        assert!(!follow_ups.is_scheduled(order.id));

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(chat.sent().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn settled_orders_are_left_alone() {
        let orders = Arc::new(InMemoryOrders::default());
        let chat = Arc::new(RecordingChat::default());
        let order = pending_order("254711000001");
        orders.insert(order.clone());

        let follow_ups = scheduler(orders.clone(), chat.clone());
        follow_ups.schedule(order.id, "254711000001");
        orders.set_status(order.id, OrderStatus::Paid);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(chat.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_nudges_never_fire() {
        let orders = Arc::new(InMemoryOrders::default());
        let chat = Arc::new(RecordingChat::default());
        let order = pending_order("254711000001");
        orders.insert(order.clone());

        let follow_ups = scheduler(orders.clone(), chat.clone());
        follow_ups.schedule(order.id, "254711000001");
        tokio::time::sleep(Duration::from_secs(10)).await;
        follow_ups.cancel(order.id);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(chat.sent().is_empty());
        assert!(!follow_ups.is_scheduled(order.id));
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_replaces_the_earlier_nudge() {
        let orders = Arc::new(InMemoryOrders::default());
        let chat = Arc::new(RecordingChat::default());
        let order = pending_order("254711000001");
        orders.insert(order.clone());

        let follow_ups = scheduler(orders.clone(), chat.clone());
        follow_ups.schedule(order.id, "254711000001");
        tokio::time::sleep(Duration::from_secs(30)).await;
        follow_ups.schedule(order.id, "254711000001");

        tokio::time::sleep(Duration::from_secs(20)).await;
        assert!(chat.sent().is_empty());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(chat.sent().len(), 1);
    }
}
