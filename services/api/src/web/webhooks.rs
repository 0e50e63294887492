//! services/api/src/web/webhooks.rs
//!
//! Inbound provider callbacks: the chat channel (subscription handshake and
//! message delivery) and the payment provider (charge and till results).

use crate::adapters::whatsapp::{verify_subscription, WebhookPayload};
use crate::payments::webhook::SIGNATURE_HEADER;
use crate::payments::{parse_webhook, verify_signature, ReconcileOutcome, WebhookError};
use crate::signature::verify_hmac_sha256;
use crate::web::state::AppState;
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json},
};
use bar_bot_core::phone::mask;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use utoipa::{IntoParams, ToSchema};

const HUB_SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Acknowledgement body for provider callbacks.
#[derive(Serialize, ToSchema)]
pub struct WebhookAck {
    pub status: String,
}

impl WebhookAck {
    fn ok() -> Json<Self> {
        Json(Self {
            status: "ok".to_string(),
        })
    }
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SubscriptionQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

//=========================================================================================
// Chat Channel
//=========================================================================================

/// Chat webhook subscription handshake. Echoes the challenge when the token matches.
#[utoipa::path(
    get,
    path = "/webhooks/whatsapp",
    params(SubscriptionQuery),
    responses(
        (status = 200, description = "Challenge echoed", body = String),
        (status = 403, description = "Wrong mode or verify token")
    )
)]
pub async fn verify_chat_webhook_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SubscriptionQuery>,
) -> Result<String, StatusCode> {
    verify_subscription(
        query.mode.as_deref(),
        query.verify_token.as_deref(),
        query.challenge.as_deref(),
        &state.webhooks.whatsapp_verify_token,
    )
    .ok_or_else(|| {
        warn!("Rejected chat webhook subscription attempt");
        StatusCode::FORBIDDEN
    })
}

/// Receives customer and staff chat messages.
///
/// Acknowledges immediately; every message is processed on its own task.
/// Staff order buttons are tried first, everything else goes to the dialogue engine.
#[utoipa::path(
    post,
    path = "/webhooks/whatsapp",
    request_body(content = String, content_type = "application/json", description = "Chat provider envelope"),
    responses(
        (status = 200, description = "Accepted", body = WebhookAck),
        (status = 400, description = "Body is not a chat envelope"),
        (status = 401, description = "Missing or invalid signature")
    )
)]
pub async fn receive_chat_webhook_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    if let Some(secret) = state.webhooks.whatsapp_app_secret.as_deref() {
        let valid = headers
            .get(HUB_SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|sig| verify_hmac_sha256(secret.as_bytes(), &body, sig));
        if !valid {
            warn!("Rejected chat webhook with a bad signature");
            return Err((StatusCode::UNAUTHORIZED, "Invalid signature".to_string()));
        }
    }

    let payload: WebhookPayload = serde_json::from_slice(&body).map_err(|e| {
        warn!(error = %e, "Unparseable chat webhook");
        (StatusCode::BAD_REQUEST, "Invalid payload".to_string())
    })?;

    for message in payload.messages() {
        let state = state.clone();
        tokio::spawn(async move {
            if state
                .lifecycle
                .handle_staff_reply(&message.phone, &message.text)
                .await
            {
                return;
            }
            if let Err(e) = state
                .engine
                .handle_incoming_message(&message.phone, &message.text, &message.message_type)
                .await
            {
                error!(phone = %mask(&message.phone), error = %e, "Failed to handle chat message");
            }
        });
    }

    Ok(WebhookAck::ok())
}

//=========================================================================================
// Payment Provider
//=========================================================================================

/// Receives payment results (push-charge callbacks and till notifications).
///
/// Unmatched payments are acknowledged and logged. A persistence failure
/// returns 500 so the provider redelivers.
#[utoipa::path(
    post,
    path = "/webhooks/payments",
    request_body(content = String, content_type = "application/json", description = "Payment provider callback"),
    responses(
        (status = 200, description = "Processed or deliberately ignored", body = WebhookAck),
        (status = 400, description = "Malformed callback"),
        (status = 401, description = "Missing or invalid signature"),
        (status = 500, description = "Could not record the result; safe to redeliver")
    ),
    params(
        ("X-KopoKopo-Signature" = Option<String>, Header, description = "HMAC-SHA256 of the raw body")
    )
)]
pub async fn payment_webhook_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());
    verify_signature(
        state.webhooks.kopokopo_webhook_secret.as_deref(),
        signature,
        &body,
    )
    .map_err(|e| {
        warn!(error = %e, "Rejected payment webhook");
        (StatusCode::UNAUTHORIZED, e.to_string())
    })?;

    let result = parse_webhook(&body).map_err(|e| {
        warn!(error = %e, "Unparseable payment webhook");
        let status = match e {
            WebhookError::InvalidSignature => StatusCode::UNAUTHORIZED,
            WebhookError::Malformed(_) => StatusCode::BAD_REQUEST,
        };
        (status, e.to_string())
    })?;

    let outcome = state.reconciler.reconcile(&result).await.map_err(|e| {
        error!(reference = %result.reference, error = %e, "Failed to reconcile payment webhook");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to process payment".to_string(),
        )
    })?;

    match outcome {
        ReconcileOutcome::Paid(order_id) => info!(%order_id, "Payment webhook applied"),
        ReconcileOutcome::AlreadyPaid(order_id) => info!(%order_id, "Duplicate payment webhook"),
        ReconcileOutcome::Failed(order_id) => info!(%order_id, "Payment failure recorded"),
        ReconcileOutcome::Orphaned | ReconcileOutcome::Ignored => {}
    }

    Ok(WebhookAck::ok())
}
