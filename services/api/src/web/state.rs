//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::Config;
use crate::engine::DialogueEngine;
use crate::events::EventBus;
use crate::orders::OrderLifecycle;
use crate::payments::PaymentReconciler;
use bar_bot_core::ports::StaffRepository;
use std::sync::Arc;

//=========================================================================================
// AppState (Shared Across All Requests)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: DialogueEngine,
    pub reconciler: PaymentReconciler,
    pub lifecycle: OrderLifecycle,
    pub staff: Arc<dyn StaffRepository>,
    pub events: EventBus,
    pub webhooks: WebhookSecrets,
}

/// The shared secrets the webhook handlers check inbound requests against.
#[derive(Clone, Debug, Default)]
pub struct WebhookSecrets {
    pub whatsapp_verify_token: String,
    /// When set, chat webhooks must carry a valid `X-Hub-Signature-256`.
    pub whatsapp_app_secret: Option<String>,
    /// When set, payment webhooks must carry a valid `X-KopoKopo-Signature`.
    pub kopokopo_webhook_secret: Option<String>,
}

impl From<&Config> for WebhookSecrets {
    fn from(config: &Config) -> Self {
        Self {
            whatsapp_verify_token: config.whatsapp.verify_token.clone(),
            whatsapp_app_secret: config.whatsapp.app_secret.clone(),
            kopokopo_webhook_secret: config.kopokopo.webhook_secret.clone(),
        }
    }
}
