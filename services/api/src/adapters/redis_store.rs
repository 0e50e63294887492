//! services/api/src/adapters/redis_store.rs
//!
//! Session Store backed by Redis. Each conversation lives under
//! `session:<phone>` as a JSON record and every write restarts its TTL.

use async_trait::async_trait;
use bar_bot_core::domain::{Cart, CartItem, ConfirmPrompt, DialogueState, ProductScope, Session};
use bar_bot_core::phone::mask;
use bar_bot_core::ports::{PortError, PortResult, SessionStore};
use redis::aio::ConnectionManager;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

const KEY_PREFIX: &str = "session:";
const SEARCH_MARKER: &str = "search:";

#[derive(Clone)]
pub struct RedisSessionStore {
    conn: ConnectionManager,
}

impl RedisSessionStore {
    /// Opens a managed connection that reconnects on its own.
    pub async fn connect(redis_url: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }
}

fn key(phone: &str) -> String {
    format!("{KEY_PREFIX}{phone}")
}

fn redis_error(e: redis::RedisError) -> PortError {
    PortError::Unexpected(e.to_string())
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn get(&self, phone: &str) -> PortResult<Option<Session>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(key(phone))
            .query_async(&mut conn)
            .await
            .map_err(redis_error)?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        match serde_json::from_str::<SessionRecord>(&raw) {
            Ok(record) => Ok(Some(record.into_session())),
            Err(e) => {
                warn!(phone = %mask(phone), error = %e, "Discarding unreadable session");
                Ok(None)
            }
        }
    }

    async fn set(&self, phone: &str, session: &Session, ttl: Duration) -> PortResult<()> {
        let payload = serde_json::to_string(&SessionRecord::from_session(session))
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SETEX")
            .arg(key(phone))
            .arg(ttl.as_secs().max(1))
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(redis_error)?;
        Ok(())
    }

    async fn delete(&self, phone: &str) -> PortResult<()> {
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("DEL")
            .arg(key(phone))
            .query_async(&mut conn)
            .await
            .map_err(redis_error)?;
        Ok(())
    }
}

//=========================================================================================
// Persisted Shape
//=========================================================================================

/// The JSON stored per phone. Every field defaults so that records written by
/// older versions still load.
#[derive(Debug, Default, Serialize, Deserialize)]
struct SessionRecord {
    #[serde(default)]
    state: String,
    /// Category name, or `search:<query>` while picking from search results.
    #[serde(default)]
    current_category: String,
    #[serde(default)]
    current_product_id: String,
    #[serde(default)]
    cart: Vec<CartItemRecord>,
    #[serde(default)]
    pending_order_id: String,
    #[serde(default)]
    confirm_prompt: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct CartItemRecord {
    product_id: Uuid,
    quantity: u32,
    name: String,
    price: Decimal,
}

impl SessionRecord {
    fn from_session(session: &Session) -> Self {
        let current_category = match &session.scope {
            ProductScope::None => String::new(),
            ProductScope::Category(name) => name.clone(),
            ProductScope::Search(query) => format!("{SEARCH_MARKER}{query}"),
        };
        Self {
            state: session.state.as_str().to_string(),
            current_category,
            current_product_id: session
                .current_product_id
                .map(|id| id.to_string())
                .unwrap_or_default(),
            cart: session
                .cart
                .items
                .iter()
                .map(|item| CartItemRecord {
                    product_id: item.product_id,
                    quantity: item.quantity,
                    name: item.name.clone(),
                    price: item.unit_price,
                })
                .collect(),
            pending_order_id: session
                .pending_order_id
                .map(|id| id.to_string())
                .unwrap_or_default(),
            confirm_prompt: session.confirm_prompt.as_str().to_string(),
        }
    }

    fn into_session(self) -> Session {
        let scope = if self.current_category.is_empty() {
            ProductScope::None
        } else if let Some(query) = self.current_category.strip_prefix(SEARCH_MARKER) {
            ProductScope::Search(query.to_string())
        } else {
            ProductScope::Category(self.current_category)
        };
        Session {
            state: DialogueState::from_persisted(&self.state),
            scope,
            current_product_id: Uuid::parse_str(&self.current_product_id).ok(),
            cart: Cart {
                items: self
                    .cart
                    .into_iter()
                    .filter(|item| item.quantity > 0)
                    .map(|item| CartItem {
                        product_id: item.product_id,
                        quantity: item.quantity,
                        name: item.name,
                        unit_price: item.price,
                    })
                    .collect(),
            },
            pending_order_id: Uuid::parse_str(&self.pending_order_id).ok(),
            confirm_prompt: ConfirmPrompt::from_persisted(&self.confirm_prompt),
        }
    }
}
