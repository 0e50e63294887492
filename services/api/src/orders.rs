//! services/api/src/orders.rs
//!
//! Staff-driven order transitions (PAID→READY→COMPLETED), shared by the chat
//! buttons on new-order notices and the HTTP staff endpoints.

use crate::events::{EventBus, OpsEvent};
use bar_bot_core::domain::{
    Button, InvalidTransition, Order, OrderStatus, TransitionOutcome,
};
use bar_bot_core::phone::{mask, same_subscriber};
use bar_bot_core::ports::{ChatGateway, OrderRepository, PortError, UserRepository};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub const READY_PREFIX: &str = "ready_";
pub const COMPLETE_PREFIX: &str = "complete_";

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("order {0} not found")]
    NotFound(Uuid),
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
    #[error(transparent)]
    Port(#[from] PortError),
}

/// The phone the customer chats from. Falls back to the order's payment
/// phone when the owner cannot be loaded.
pub async fn customer_chat_phone(users: &dyn UserRepository, order: &Order) -> String {
    match users.get_user(order.user_id).await {
        Ok(user) => user.phone_number,
        Err(e) => {
            warn!(order_id = %order.id, error = %e, "Could not load order owner; using payment phone");
            order.customer_phone.clone()
        }
    }
}

#[derive(Clone)]
pub struct OrderLifecycle {
    orders: Arc<dyn OrderRepository>,
    users: Arc<dyn UserRepository>,
    chat: Arc<dyn ChatGateway>,
    events: EventBus,
    staff_phones: Vec<String>,
}

impl OrderLifecycle {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        users: Arc<dyn UserRepository>,
        chat: Arc<dyn ChatGateway>,
        events: EventBus,
        staff_phones: Vec<String>,
    ) -> Self {
        Self {
            orders,
            users,
            chat,
            events,
            staff_phones,
        }
    }

    /// PAID→READY. Tells the customer their drinks are waiting, once.
    pub async fn mark_ready(
        &self,
        order_id: Uuid,
        actor: Option<&str>,
    ) -> Result<(Order, TransitionOutcome), LifecycleError> {
        let (order, outcome) = self.advance(order_id, OrderStatus::Ready, actor).await?;
        if outcome == TransitionOutcome::Applied {
            let text = format!(
                "🍹 Your order is ready! Show pickup code *{}* at the bar to collect your drinks.",
                order.pickup_code
            );
            let phone = customer_chat_phone(self.users.as_ref(), &order).await;
            if let Err(e) = self.chat.send_text(&phone, &text).await {
                warn!(%order_id, error = %e, "Failed to send ready notice");
            }
            self.events.publish(OpsEvent::OrderReady {
                order_id,
                pickup_code: order.pickup_code.clone(),
                actor: actor.map(str::to_string),
            });
        }
        Ok((order, outcome))
    }

    /// READY→COMPLETED.
    pub async fn mark_completed(
        &self,
        order_id: Uuid,
        actor: Option<&str>,
    ) -> Result<(Order, TransitionOutcome), LifecycleError> {
        let (order, outcome) = self.advance(order_id, OrderStatus::Completed, actor).await?;
        if outcome == TransitionOutcome::Applied {
            self.events.publish(OpsEvent::OrderCompleted {
                order_id,
                pickup_code: order.pickup_code.clone(),
                actor: actor.map(str::to_string),
            });
        }
        Ok((order, outcome))
    }

    async fn advance(
        &self,
        order_id: Uuid,
        target: OrderStatus,
        actor: Option<&str>,
    ) -> Result<(Order, TransitionOutcome), LifecycleError> {
        let order = self.load(order_id).await?;
        if order.status.check_transition(target)? == TransitionOutcome::AlreadyApplied {
            return Ok((order, TransitionOutcome::AlreadyApplied));
        }

        let applied = self
            .orders
            .transition_status(order_id, order.status, target, actor)
            .await?;
        let current = self.load(order_id).await?;
        if applied {
            info!(%order_id, from = %order.status, to = %target, actor = actor.unwrap_or("-"), "Order advanced");
            return Ok((current, TransitionOutcome::Applied));
        }

        // Someone else moved it first.
        match current.status.check_transition(target)? {
            TransitionOutcome::AlreadyApplied => Ok((current, TransitionOutcome::AlreadyApplied)),
            TransitionOutcome::Applied => Err(InvalidTransition {
                from: current.status,
                to: target,
            }
            .into()),
        }
    }

    async fn load(&self, order_id: Uuid) -> Result<Order, LifecycleError> {
        match self.orders.get_order(order_id).await {
            Ok(order) => Ok(order),
            Err(PortError::NotFound(_)) => Err(LifecycleError::NotFound(order_id)),
            Err(e) => Err(e.into()),
        }
    }

    pub fn is_staff(&self, phone: &str) -> bool {
        self.staff_phones.iter().any(|staff| same_subscriber(staff, phone))
    }

    /// Handles a `ready_<id>` / `complete_<id>` button tap from bar staff.
    /// Returns `false` when the message is not a staff action, so the caller
    /// can route it to the dialogue engine instead.
    pub async fn handle_staff_reply(&self, phone: &str, text: &str) -> bool {
        if !self.is_staff(phone) {
            return false;
        }
        let text = text.trim();
        let (target, raw_id) = if let Some(id) = text.strip_prefix(READY_PREFIX) {
            (OrderStatus::Ready, id)
        } else if let Some(id) = text.strip_prefix(COMPLETE_PREFIX) {
            (OrderStatus::Completed, id)
        } else {
            return false;
        };
        let Ok(order_id) = Uuid::parse_str(raw_id) else {
            return false;
        };

        let (reply, buttons) = match target {
            OrderStatus::Ready => match self.mark_ready(order_id, Some(phone)).await {
                Ok((order, TransitionOutcome::Applied)) => (
                    format!("✅ Order #{} marked ready. The customer has been told.", order.pickup_code),
                    vec![Button::new(format!("{COMPLETE_PREFIX}{order_id}"), "Collected")],
                ),
                Ok((order, TransitionOutcome::AlreadyApplied)) => (
                    format!("ℹ️ Order #{} is already marked ready.", order.pickup_code),
                    vec![Button::new(format!("{COMPLETE_PREFIX}{order_id}"), "Collected")],
                ),
                Err(e) => (failure_reply(&e), Vec::new()),
            },
            _ => match self.mark_completed(order_id, Some(phone)).await {
                Ok((order, TransitionOutcome::Applied)) => (
                    format!("✅ Order #{} marked as served!", order.pickup_code),
                    Vec::new(),
                ),
                Ok((order, TransitionOutcome::AlreadyApplied)) => (
                    format!("ℹ️ Order #{} was already marked as completed.", order.pickup_code),
                    Vec::new(),
                ),
                Err(e) => (failure_reply(&e), Vec::new()),
            },
        };

        let sent = if buttons.is_empty() {
            self.chat.send_text(phone, &reply).await
        } else {
            self.chat.send_buttons(phone, &reply, &buttons).await
        };
        if let Err(e) = sent {
            warn!(%order_id, staff = %mask(phone), error = %e, "Failed to reply to bar staff");
        }
        true
    }
}

fn failure_reply(error: &LifecycleError) -> String {
    match error {
        LifecycleError::NotFound(_) => "❌ Order not found".to_string(),
        LifecycleError::InvalidTransition(invalid) => format!(
            "⚠️ That order is {} and can't be marked {}.",
            invalid.from, invalid.to
        ),
        LifecycleError::Port(e) => {
            warn!(error = %e, "Staff action failed");
            "❌ Failed to update order status".to_string()
        }
    }
}
