//! services/api/src/engine/checkout.rs
//!
//! Checkout: the duplicate-checkout guard, order creation and the hand-off to
//! the Payment Dispatch Queue, plus re-dispatch from a "Retry Payment" tap.

use super::dialogue::{cart_summary, DialogueEngine, CHECKOUT, PAY_OTHER, PAY_SELF};
use crate::engine::followup::RETRY_PAYMENT_PREFIX;
use crate::events::OpsEvent;
use bar_bot_core::domain::{
    Button, ConfirmPrompt, DialogueState, Order, OrderItem, OrderStatus, PaymentMethod,
    ProductScope, Session,
};
use bar_bot_core::phone::mask;
use bar_bot_core::ports::{PortError, PortResult};
use chrono::Utc;
use rand::Rng;
use tracing::{info, warn};
use uuid::Uuid;

/// A four-digit code the customer shows at the bar.
fn generate_pickup_code() -> String {
    format!("{:04}", rand::thread_rng().gen_range(0..10_000))
}

fn order_from_session(session: &Session, user_id: Uuid, payment_phone: &str) -> Order {
    let order_id = Uuid::new_v4();
    let items = session
        .cart
        .items
        .iter()
        .map(|line| OrderItem {
            id: Uuid::new_v4(),
            order_id,
            product_id: line.product_id,
            product_name: line.name.clone(),
            quantity: line.quantity,
            price_at_time: line.unit_price,
        })
        .collect();

    Order {
        id: order_id,
        user_id,
        customer_phone: payment_phone.to_string(),
        table_number: None,
        total_amount: session.cart.payable_total(),
        status: OrderStatus::Pending,
        payment_method: PaymentMethod::Mpesa,
        payment_reference: None,
        pickup_code: generate_pickup_code(),
        items,
        created_at: Utc::now(),
        ready_at: None,
        ready_by: None,
        completed_at: None,
        completed_by: None,
    }
}

impl DialogueEngine {
    /// The session's pending order, if it is still awaiting payment.
    async fn live_pending_order(&self, session: &Session) -> PortResult<Option<Order>> {
        let Some(order_id) = session.pending_order_id else {
            return Ok(None);
        };
        match self.ports.orders.get_order(order_id).await {
            Ok(order) if order.status == OrderStatus::Pending => Ok(Some(order)),
            Ok(_) | Err(PortError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Runs the checkout guards. Returns `false` after telling the customer
    /// why checkout cannot go ahead.
    async fn checkout_allowed(&self, phone: &str, session: &mut Session) -> PortResult<bool> {
        if session.cart.is_empty() {
            self.ports
                .chat
                .send_text(phone, "🛒 Your cart is empty. Send 'menu' to browse our drinks.")
                .await?;
            return Ok(false);
        }

        if let Some(order) = self.live_pending_order(session).await? {
            info!(order_id = %order.id, phone = %mask(phone), "Checkout blocked by pending payment");
            let text = format!(
                "⏳ You already have a payment pending for order #{}. \
                 Please check your phone for the M-PESA prompt.",
                order.short_id()
            );
            self.ports.chat.send_text(phone, &text).await?;
            return Ok(false);
        }

        session.pending_order_id = None;
        Ok(true)
    }

    /// The "checkout" tap: shows the order summary and asks which phone to charge.
    pub(super) async fn begin_checkout(&self, phone: &str, session: &mut Session) -> PortResult<()> {
        if !self.checkout_allowed(phone, session).await? {
            return Ok(());
        }

        session.state = DialogueState::ConfirmOrder;
        session.confirm_prompt = ConfirmPrompt::PaymentPhone;
        let text = format!(
            "🧾 *Order Summary*\n\n{}\n\nWhich M-PESA number should we charge?",
            cart_summary(&session.cart)
        );
        let buttons = [
            Button::new(PAY_SELF, "Use My Number"),
            Button::new(PAY_OTHER, "Different Number"),
        ];
        self.ports.chat.send_buttons(phone, &text, &buttons).await
    }

    /// Creates the PENDING order and queues its charge to `payment_phone`.
    ///
    /// Nothing is sent to the customer on success: the M-PESA prompt lands on
    /// their phone moments later, and the follow-up covers a prompt that never
    /// arrives.
    pub(super) async fn place_order(
        &self,
        phone: &str,
        session: &mut Session,
        payment_phone: &str,
    ) -> PortResult<()> {
        if !self.checkout_allowed(phone, session).await? {
            return Ok(());
        }

        let user = self.ports.users.get_or_create_by_phone(phone).await?;
        let order = order_from_session(session, user.id, payment_phone);
        self.ports.orders.create_order(&order).await?;
        info!(
            order_id = %order.id,
            amount = %order.total_amount,
            phone = %mask(payment_phone),
            "Order created"
        );

        // Persisted before dispatch so a double tap sees the pending order.
        session.pending_order_id = Some(order.id);
        self.save(phone, session).await?;

        match self
            .dispatch
            .enqueue(order.id, payment_phone, order.total_amount)
        {
            Ok(outcome) => {
                info!(order_id = %order.id, ?outcome, "Payment dispatched");
                session.cart.clear();
                session.state = DialogueState::Start;
                session.scope = ProductScope::None;
                session.current_product_id = None;
                self.follow_ups.schedule(order.id, phone);
                Ok(())
            }
            Err(e) => {
                warn!(order_id = %order.id, error = %e, "Could not queue payment; failing order");
                let failed = self
                    .ports
                    .orders
                    .transition_status(order.id, OrderStatus::Pending, OrderStatus::Failed, None)
                    .await?;
                if failed {
                    self.ports.events.publish(OpsEvent::OrderFailed {
                        order_id: order.id,
                        reason: e.to_string(),
                    });
                }
                session.pending_order_id = None;
                session.state = DialogueState::ConfirmOrder;
                session.confirm_prompt = ConfirmPrompt::CartActions;
                let buttons = [Button::new(CHECKOUT, "Checkout")];
                self.ports
                    .chat
                    .send_buttons(
                        phone,
                        "⚠️ Our payment system is busy right now. Please tap Checkout again in a moment.",
                        &buttons,
                    )
                    .await
            }
        }
    }

    /// A "Retry Payment" tap. Re-dispatches silently when the order is the
    /// sender's own and still PENDING.
    pub(super) async fn retry_payment(
        &self,
        phone: &str,
        session: &mut Session,
        order_id: Uuid,
    ) -> PortResult<()> {
        let order = match self.ports.orders.get_order(order_id).await {
            Ok(order) => Some(order),
            Err(PortError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };
        let user = self.ports.users.get_or_create_by_phone(phone).await?;

        let Some(order) = order.filter(|o| o.user_id == user.id) else {
            warn!(%order_id, phone = %mask(phone), "Retry for an unknown or foreign order");
            return self
                .ports
                .chat
                .send_text(phone, "Sorry, we couldn't find that order. Send 'hi' to start a new one.")
                .await;
        };

        if order.status != OrderStatus::Pending {
            let text = format!(
                "ℹ️ Order #{} is no longer awaiting payment. Send 'hi' to start a new order.",
                order.short_id()
            );
            return self.ports.chat.send_text(phone, &text).await;
        }

        match self
            .dispatch
            .enqueue(order.id, &order.customer_phone, order.total_amount)
        {
            Ok(outcome) => {
                info!(%order_id, ?outcome, "Payment re-dispatched");
                session.pending_order_id = Some(order.id);
                self.follow_ups.schedule(order.id, phone);
                Ok(())
            }
            Err(e) => {
                warn!(%order_id, error = %e, "Could not queue payment retry");
                let buttons = [Button::new(
                    format!("{RETRY_PAYMENT_PREFIX}{order_id}"),
                    "Retry Payment",
                )];
                self.ports
                    .chat
                    .send_buttons(
                        phone,
                        "⚠️ Our payment system is busy right now. Please tap Retry Payment again in a moment.",
                        &buttons,
                    )
                    .await
            }
        }
    }
}
