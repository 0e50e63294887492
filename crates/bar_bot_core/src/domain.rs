//! crates/bar_bot_core/src/domain.rs
//!
//! Defines the pure, core data structures for the bar bot.
//! These structs are independent of any database or serialization format.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

//=========================================================================================
// Catalog
//=========================================================================================

/// A menu item (drink) that customers can order.
#[derive(Debug, Clone, PartialEq)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub price: Decimal,
    pub category: String,
    pub stock_quantity: i32,
    pub is_active: bool,
}

/// Active products grouped by category name.
pub type Menu = BTreeMap<String, Vec<Product>>;

/// M-PESA charges whole shillings; half a shilling rounds up.
pub fn whole_shillings(amount: Decimal) -> Decimal {
    amount
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .trunc()
}

//=========================================================================================
// Cart
//=========================================================================================

/// One cart line. Name and price are captured when the line is added, so later
/// catalog price changes never touch an open cart.
#[derive(Debug, Clone, PartialEq)]
pub struct CartItem {
    pub product_id: Uuid,
    pub quantity: u32,
    pub name: String,
    pub unit_price: Decimal,
}

impl CartItem {
    /// Snapshots `product` at its current price.
    pub fn from_product(product: &Product, quantity: u32) -> Self {
        Self {
            product_id: product.id,
            quantity,
            name: product.name.clone(),
            unit_price: product.price,
        }
    }

    pub fn subtotal(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Cart {
    pub items: Vec<CartItem>,
}

impl Cart {
    pub fn add(&mut self, item: CartItem) {
        self.items.push(item);
    }

    pub fn total(&self) -> Decimal {
        self.items.iter().map(CartItem::subtotal).sum()
    }

    /// The amount an order for this cart is stored at and charged.
    pub fn payable_total(&self) -> Decimal {
        whole_shillings(self.total())
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

//=========================================================================================
// Conversation Session
//=========================================================================================

/// The dialogue state of one customer conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DialogueState {
    #[default]
    Start,
    Browsing,
    SelectingProduct,
    Quantity,
    ConfirmOrder,
    WaitingForPaymentPhone,
}

impl DialogueState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DialogueState::Start => "START",
            DialogueState::Browsing => "BROWSING",
            DialogueState::SelectingProduct => "SELECTING_PRODUCT",
            DialogueState::Quantity => "QUANTITY",
            DialogueState::ConfirmOrder => "CONFIRM_ORDER",
            DialogueState::WaitingForPaymentPhone => "WAITING_FOR_PAYMENT_PHONE",
        }
    }

    /// Maps a persisted state name back to a state. Unknown or legacy names
    /// (e.g. the old `MENU` step) resolve to `Start`.
    pub fn from_persisted(value: &str) -> Self {
        match value {
            "BROWSING" => DialogueState::Browsing,
            "SELECTING_PRODUCT" => DialogueState::SelectingProduct,
            "QUANTITY" => DialogueState::Quantity,
            "CONFIRM_ORDER" => DialogueState::ConfirmOrder,
            "WAITING_FOR_PAYMENT_PHONE" => DialogueState::WaitingForPaymentPhone,
            _ => DialogueState::Start,
        }
    }
}

impl fmt::Display for DialogueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which product set a customer is currently picking from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ProductScope {
    #[default]
    None,
    /// Products of one menu category.
    Category(String),
    /// Results of a free-text search, re-executed on every message.
    Search(String),
}

/// Per-phone conversation state, owned by the dialogue engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Session {
    pub state: DialogueState,
    pub scope: ProductScope,
    pub current_product_id: Option<Uuid>,
    pub cart: Cart,
    /// The order awaiting payment, if any. At most one per session.
    pub pending_order_id: Option<Uuid>,
    /// Which choices CONFIRM_ORDER last offered.
    pub confirm_prompt: ConfirmPrompt,
}

/// The two button sets shown while in `CONFIRM_ORDER`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConfirmPrompt {
    /// "Add More" / "Checkout", after an item lands in the cart.
    #[default]
    CartActions,
    /// "Use My Number" / "Different Number", after the checkout summary.
    PaymentPhone,
}

impl ConfirmPrompt {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfirmPrompt::CartActions => "CART_ACTIONS",
            ConfirmPrompt::PaymentPhone => "PAYMENT_PHONE",
        }
    }

    /// Unknown or missing names load as `CartActions`.
    pub fn from_persisted(name: &str) -> Self {
        match name {
            "PAYMENT_PHONE" => ConfirmPrompt::PaymentPhone,
            _ => ConfirmPrompt::CartActions,
        }
    }
}

impl Session {
    /// A brand-new `START` session with an empty cart.
    pub fn fresh() -> Self {
        Self::default()
    }
}

//=========================================================================================
// Orders
//=========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderStatus {
    Pending,
    Paid,
    Ready,
    Completed,
    Failed,
}

/// Result of checking or applying a status transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The order moved to the target status.
    Applied,
    /// The order was already in the target status; nothing changed.
    AlreadyApplied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("order cannot move from {from} to {to}")]
pub struct InvalidTransition {
    pub from: OrderStatus,
    pub to: OrderStatus,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Paid => "PAID",
            OrderStatus::Ready => "READY",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Failed => "FAILED",
        }
    }

    /// The status an order must hold before it can move to `self`.
    pub fn required_predecessor(&self) -> Option<OrderStatus> {
        match self {
            OrderStatus::Pending => None,
            OrderStatus::Paid | OrderStatus::Failed => Some(OrderStatus::Pending),
            OrderStatus::Ready => Some(OrderStatus::Paid),
            OrderStatus::Completed => Some(OrderStatus::Ready),
        }
    }

    /// Checks a move from `self` to `target`. Re-applying the current status is
    /// a no-op, never an error.
    pub fn check_transition(
        &self,
        target: OrderStatus,
    ) -> Result<TransitionOutcome, InvalidTransition> {
        if *self == target {
            return Ok(TransitionOutcome::AlreadyApplied);
        }
        match target.required_predecessor() {
            Some(from) if from == *self => Ok(TransitionOutcome::Applied),
            _ => Err(InvalidTransition {
                from: *self,
                to: target,
            }),
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown order status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for OrderStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(OrderStatus::Pending),
            "PAID" => Ok(OrderStatus::Paid),
            "READY" => Ok(OrderStatus::Ready),
            "COMPLETED" => Ok(OrderStatus::Completed),
            "FAILED" => Ok(OrderStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentMethod {
    Mpesa,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Mpesa => "MPESA",
        }
    }
}

/// A single line of an order, priced at order time.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderItem {
    pub id: Uuid,
    pub order_id: Uuid,
    pub product_id: Uuid,
    pub product_name: String,
    pub quantity: u32,
    pub price_at_time: Decimal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    /// The phone that is charged. May differ from the customer's chat phone.
    pub customer_phone: String,
    pub table_number: Option<String>,
    pub total_amount: Decimal,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    pub payment_reference: Option<String>,
    pub pickup_code: String,
    pub items: Vec<OrderItem>,
    pub created_at: DateTime<Utc>,
    pub ready_at: Option<DateTime<Utc>>,
    pub ready_by: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub completed_by: Option<String>,
}

impl Order {
    /// First eight characters of the id, as shown to customers.
    pub fn short_id(&self) -> String {
        self.id.simple().to_string()[..8].to_string()
    }
}

//=========================================================================================
// People
//=========================================================================================

/// A customer, identified by chat phone.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub phone_number: String,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaffRole {
    Manager,
    Bartender,
}

impl StaffRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            StaffRole::Manager => "MANAGER",
            StaffRole::Bartender => "BARTENDER",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown staff role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for StaffRole {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MANAGER" => Ok(StaffRole::Manager),
            "BARTENDER" => Ok(StaffRole::Bartender),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

// Only used internally for PIN login - contains the PIN hash
#[derive(Debug, Clone)]
pub struct StaffUser {
    pub id: Uuid,
    pub phone_number: String,
    pub name: String,
    pub role: StaffRole,
    pub pin_hash: String,
    pub is_active: bool,
}

//=========================================================================================
// Payments
//=========================================================================================

/// A request to push a charge prompt to a phone.
#[derive(Debug, Clone, PartialEq)]
pub struct ChargeRequest {
    pub order_id: Uuid,
    pub phone: String,
    pub amount: Decimal,
}

/// One parsed payment-provider callback. Never persisted.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PaymentWebhookResult {
    pub order_id: Option<Uuid>,
    pub status: String,
    pub reference: String,
    pub amount: Option<Decimal>,
    pub sender_phone: Option<String>,
    /// Present only on order-less (till) callbacks.
    pub hashed_sender_phone: Option<String>,
    pub success: bool,
}

//=========================================================================================
// Chat affordances
//=========================================================================================

/// A quick-reply button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub id: String,
    pub title: String,
}

impl Button {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
        }
    }
}

/// One row of a selectable list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListRow {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
}
