//! services/api/src/payments/reconciler.rs
//!
//! The Payment Webhook Reconciler. Resolves a parsed callback to exactly one
//! order, moves it PENDING→PAID (or PENDING→FAILED) with a compare-and-set so
//! duplicate deliveries are harmless, and fans out notifications on the first
//! successful transition only.

use crate::engine::followup::FollowUpScheduler;
use crate::events::{EventBus, OpsEvent};
use crate::orders::{customer_chat_phone, READY_PREFIX};
use bar_bot_core::catalog::format_kes;
use bar_bot_core::domain::{Button, Order, OrderStatus, PaymentWebhookResult};
use bar_bot_core::phone::{mask, matches_hashed_phone};
use bar_bot_core::ports::{ChatGateway, OrderRepository, PortError, PortResult, UserRepository};
use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How far back an order-less callback is matched against hashed phones.
const HASHED_MATCH_WINDOW_MINUTES: i64 = 30;

/// The ways a callback can be tied to an order, tried in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchStrategy {
    OrderId,
    SenderPhone,
    HashedSenderPhone,
}

pub const MATCH_ORDER: [MatchStrategy; 3] = [
    MatchStrategy::OrderId,
    MatchStrategy::SenderPhone,
    MatchStrategy::HashedSenderPhone,
];

impl MatchStrategy {
    async fn find(
        self,
        result: &PaymentWebhookResult,
        orders: &dyn OrderRepository,
    ) -> PortResult<Option<Order>> {
        match self {
            MatchStrategy::OrderId => {
                let Some(order_id) = result.order_id else {
                    return Ok(None);
                };
                match orders.get_order(order_id).await {
                    Ok(order) => Ok(Some(order)),
                    Err(PortError::NotFound(_)) => Ok(None),
                    Err(e) => Err(e),
                }
            }
            MatchStrategy::SenderPhone => match (&result.sender_phone, result.amount) {
                (Some(phone), Some(amount)) => {
                    orders.find_pending_by_phone_and_amount(phone, amount).await
                }
                _ => Ok(None),
            },
            MatchStrategy::HashedSenderPhone => {
                let (Some(hashed), Some(amount)) = (&result.hashed_sender_phone, result.amount)
                else {
                    return Ok(None);
                };
                let since = Utc::now() - Duration::minutes(HASHED_MATCH_WINDOW_MINUTES);
                let candidates = orders.find_recent_pending_by_amount(amount, since).await?;
                Ok(candidates
                    .into_iter()
                    .find(|order| matches_hashed_phone(&order.customer_phone, hashed)))
            }
        }
    }
}

/// What a callback did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The order moved to PAID and everyone was told.
    Paid(Uuid),
    /// The order had already left PENDING for PAID or beyond; nothing fired.
    AlreadyPaid(Uuid),
    Failed(Uuid),
    /// A successful payment that could not be placed against a pending order.
    Orphaned,
    /// A non-success callback with nothing to act on.
    Ignored,
}

#[derive(Clone)]
pub struct PaymentReconciler {
    orders: Arc<dyn OrderRepository>,
    users: Arc<dyn UserRepository>,
    chat: Arc<dyn ChatGateway>,
    events: EventBus,
    follow_ups: FollowUpScheduler,
    staff_phones: Vec<String>,
}

impl PaymentReconciler {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        users: Arc<dyn UserRepository>,
        chat: Arc<dyn ChatGateway>,
        events: EventBus,
        follow_ups: FollowUpScheduler,
        staff_phones: Vec<String>,
    ) -> Self {
        Self {
            orders,
            users,
            chat,
            events,
            follow_ups,
            staff_phones,
        }
    }

    /// Runs the matchers in [`MATCH_ORDER`] and returns the first hit.
    pub async fn resolve(
        &self,
        result: &PaymentWebhookResult,
    ) -> PortResult<Option<(Order, MatchStrategy)>> {
        for strategy in MATCH_ORDER {
            if let Some(order) = strategy.find(result, self.orders.as_ref()).await? {
                debug!(order_id = %order.id, ?strategy, "Webhook matched an order");
                return Ok(Some((order, strategy)));
            }
        }
        Ok(None)
    }

    /// Applies one callback. Only repository failures are returned as errors;
    /// notification failures are logged and swallowed.
    pub async fn reconcile(&self, result: &PaymentWebhookResult) -> PortResult<ReconcileOutcome> {
        if result.success {
            self.apply_success(result).await
        } else {
            self.apply_failure(result).await
        }
    }

    async fn apply_success(&self, result: &PaymentWebhookResult) -> PortResult<ReconcileOutcome> {
        let Some((order, _)) = self.resolve(result).await? else {
            self.log_orphan(result, "no matching pending order");
            return Ok(ReconcileOutcome::Orphaned);
        };

        let applied = self
            .orders
            .transition_status(order.id, OrderStatus::Pending, OrderStatus::Paid, None)
            .await?;
        if !applied {
            let current = self.orders.get_order(order.id).await?;
            return match current.status {
                OrderStatus::Paid | OrderStatus::Ready | OrderStatus::Completed => {
                    info!(order_id = %order.id, status = %current.status, "Duplicate payment webhook ignored");
                    Ok(ReconcileOutcome::AlreadyPaid(order.id))
                }
                OrderStatus::Pending | OrderStatus::Failed => {
                    self.log_orphan(result, "order is no longer payable");
                    Ok(ReconcileOutcome::Orphaned)
                }
            };
        }

        let mut order = order;
        order.status = OrderStatus::Paid;
        info!(
            order_id = %order.id,
            amount = %order.total_amount,
            reference = %result.reference,
            "Order paid"
        );

        self.follow_ups.cancel(order.id);
        self.notify_customer_paid(&order).await;
        self.notify_staff_new_order(&order).await;
        self.events.publish(OpsEvent::new_order(&order));
        Ok(ReconcileOutcome::Paid(order.id))
    }

    async fn apply_failure(&self, result: &PaymentWebhookResult) -> PortResult<ReconcileOutcome> {
        // Till callbacks never report a failed charge, only progress; a
        // failure is trusted only when it names the order.
        let Some(order) = MatchStrategy::OrderId.find(result, self.orders.as_ref()).await? else {
            debug!(status = %result.status, "Non-success webhook without an order; ignoring");
            return Ok(ReconcileOutcome::Ignored);
        };

        let applied = self
            .orders
            .transition_status(order.id, OrderStatus::Pending, OrderStatus::Failed, None)
            .await?;
        if !applied {
            debug!(order_id = %order.id, status = %order.status, "Failure webhook for a settled order");
            return Ok(ReconcileOutcome::Ignored);
        }

        info!(order_id = %order.id, status = %result.status, "Payment failed");
        self.follow_ups.cancel(order.id);

        let text = format!(
            "❌ Payment failed for order #{}. Please try again by sending 'hi' to restart.",
            order.short_id()
        );
        let phone = customer_chat_phone(self.users.as_ref(), &order).await;
        if let Err(e) = self.chat.send_text(&phone, &text).await {
            warn!(order_id = %order.id, error = %e, "Failed to send payment failure notice");
        }
        self.events.publish(OpsEvent::OrderFailed {
            order_id: order.id,
            reason: result.status.clone(),
        });
        Ok(ReconcileOutcome::Failed(order.id))
    }

    async fn notify_customer_paid(&self, order: &Order) {
        let text = format!(
            "✅ *Payment Received!*\n\n\
             Your order has been confirmed 🍹\n\n\
             *Pickup Code:* {}\n\
             *Total:* {}\n\n\
             Show this code to the bartender when collecting your drinks!\n\n\
             _Type 'Menu' to order more._",
            order.pickup_code,
            format_kes(order.total_amount)
        );
        let phone = customer_chat_phone(self.users.as_ref(), order).await;
        if let Err(e) = self.chat.send_text(&phone, &text).await {
            warn!(order_id = %order.id, error = %e, "Failed to send payment confirmation");
        }
    }

    async fn notify_staff_new_order(&self, order: &Order) {
        if self.staff_phones.is_empty() {
            debug!(order_id = %order.id, "No bar staff phones configured");
            return;
        }

        let items: String = order
            .items
            .iter()
            .map(|item| format!("• {} x {}\n", item.quantity, item.product_name))
            .collect();
        let text = format!(
            "🔔 *New Order #{}*\n\n📦 *Items:*\n{}\n💰 Total: {}\n📱 Customer: {}",
            order.pickup_code,
            items,
            format_kes(order.total_amount),
            mask(&order.customer_phone)
        );
        let buttons = [Button::new(format!("{READY_PREFIX}{}", order.id), "Mark Done")];

        for phone in &self.staff_phones {
            if let Err(e) = self.chat.send_buttons(phone, &text, &buttons).await {
                warn!(order_id = %order.id, staff = %mask(phone), error = %e, "Failed to notify bar staff");
            }
        }
    }

    fn log_orphan(&self, result: &PaymentWebhookResult, reason: &str) {
        warn!(
            reason,
            order_id = ?result.order_id,
            amount = ?result.amount,
            phone = %result.sender_phone.as_deref().map(mask).unwrap_or_default(),
            hashed_phone = result.hashed_sender_phone.is_some(),
            reference = %result.reference,
            status = %result.status,
            "Orphaned payment received"
        );
    }
}
