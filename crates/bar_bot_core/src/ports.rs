//! crates/bar_bot_core/src/ports.rs
//!
//! Defines the service contracts (traits) the bar bot's core logic depends on.
//! These traits form the boundary of the hexagonal architecture: the dialogue
//! engine, payment dispatch and reconciliation only ever see these, never a
//! concrete database, cache, chat provider or payment provider.

use crate::domain::{
    Button, ChargeRequest, ListRow, Menu, Order, OrderStatus, Product, Session, StaffUser, User,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::time::Duration;
use uuid::Uuid;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Unauthorized")]
    Unauthorized,
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Persistence Ports
//=========================================================================================

#[async_trait]
pub trait CatalogService: Send + Sync {
    /// All active products grouped by category.
    async fn get_menu(&self) -> PortResult<Menu>;

    async fn get_product(&self, product_id: Uuid) -> PortResult<Product>;

    /// Case-insensitive substring search over active product names.
    async fn search_products(&self, query: &str) -> PortResult<Vec<Product>>;
}

/// Durable, TTL-bounded conversation state keyed by chat phone.
/// Writes are last-write-wins.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, phone: &str) -> PortResult<Option<Session>>;

    /// Stores the session and restarts its TTL.
    async fn set(&self, phone: &str, session: &Session, ttl: Duration) -> PortResult<()>;

    async fn delete(&self, phone: &str) -> PortResult<()>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Persists the order and its items atomically.
    async fn create_order(&self, order: &Order) -> PortResult<()>;

    async fn get_order(&self, order_id: Uuid) -> PortResult<Order>;

    /// Moves the order from `from` to `to` only if it currently holds `from`.
    /// Returns `false` when the stored status differed and nothing changed.
    /// `actor` is recorded for the READY and COMPLETED stages.
    async fn transition_status(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
        actor: Option<&str>,
    ) -> PortResult<bool>;

    /// The most recent PENDING order for `amount` whose phone equals `phone`
    /// exactly or on the last nine digits.
    async fn find_pending_by_phone_and_amount(
        &self,
        phone: &str,
        amount: Decimal,
    ) -> PortResult<Option<Order>>;

    /// PENDING orders for exactly `amount` created after `since`, newest first.
    async fn find_recent_pending_by_amount(
        &self,
        amount: Decimal,
        since: DateTime<Utc>,
    ) -> PortResult<Vec<Order>>;
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn get_or_create_by_phone(&self, phone: &str) -> PortResult<User>;

    async fn get_user(&self, user_id: Uuid) -> PortResult<User>;
}

#[async_trait]
pub trait StaffRepository: Send + Sync {
    async fn list_active_staff(&self) -> PortResult<Vec<StaffUser>>;

    async fn create_staff_session(
        &self,
        session_id: &str,
        staff_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()>;

    /// Returns the staff id for a live session, or `Unauthorized`.
    async fn validate_staff_session(&self, session_id: &str) -> PortResult<Uuid>;

    async fn delete_staff_session(&self, session_id: &str) -> PortResult<()>;
}

//=========================================================================================
// Provider Ports
//=========================================================================================

/// Outbound messages on the chat channel.
#[async_trait]
pub trait ChatGateway: Send + Sync {
    async fn send_text(&self, phone: &str, text: &str) -> PortResult<()>;

    /// Sends a message with quick-reply buttons (the channel allows at most three).
    async fn send_buttons(&self, phone: &str, text: &str, buttons: &[Button]) -> PortResult<()>;

    /// Sends a single-section selectable list (the channel allows at most ten rows).
    async fn send_list(
        &self,
        phone: &str,
        text: &str,
        button_label: &str,
        rows: &[ListRow],
    ) -> PortResult<()>;
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Pushes a charge prompt to the request's phone. Returns the provider's
    /// reference for the request when it gives one.
    async fn initiate_charge(&self, request: &ChargeRequest) -> PortResult<Option<String>>;
}
