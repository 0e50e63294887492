//! services/api/src/adapters/whatsapp.rs
//!
//! WhatsApp Cloud API adapter: the outbound `ChatGateway` implementation, plus
//! the inbound pieces the webhook handler needs (subscription verification and
//! flattening the nested webhook envelope into plain messages).

use async_trait::async_trait;
use bar_bot_core::domain::{Button, ListRow};
use bar_bot_core::phone::mask;
use bar_bot_core::ports::{ChatGateway, PortError, PortResult};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, error};

pub const MAX_BUTTONS: usize = 3;
pub const MAX_LIST_ROWS: usize = 10;
const BUTTON_TITLE_MAX: usize = 20;
const ROW_TITLE_MAX: usize = 24;
const ROW_DESCRIPTION_MAX: usize = 72;

//=========================================================================================
// Outbound Client
//=========================================================================================

#[derive(Clone)]
pub struct WhatsAppClient {
    http: reqwest::Client,
    api_base: String,
    phone_number_id: String,
    token: String,
}

impl WhatsAppClient {
    pub fn new(
        api_base: &str,
        phone_number_id: &str,
        token: &str,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            phone_number_id: phone_number_id.to_string(),
            token: token.to_string(),
        })
    }

    async fn post_message(&self, phone: &str, payload: Value) -> PortResult<()> {
        let url = format!("{}/{}/messages", self.api_base, self.phone_number_id);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.token)
            .json(&payload)
            .send()
            .await
            .map_err(|e| PortError::Unexpected(format!("whatsapp request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(phone = %mask(phone), %status, %body, "WhatsApp API rejected message");
            return Err(PortError::Unexpected(format!(
                "whatsapp API error: status {status}"
            )));
        }
        debug!(phone = %mask(phone), "WhatsApp message sent");
        Ok(())
    }
}

/// Shortens `text` to at most `max` characters, ending with an ellipsis when cut.
fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max.saturating_sub(1)).collect();
    format!("{kept}…")
}

fn text_payload(phone: &str, text: &str) -> Value {
    json!({
        "messaging_product": "whatsapp",
        "to": phone,
        "type": "text",
        "text": { "body": text },
    })
}

fn buttons_payload(phone: &str, text: &str, buttons: &[Button]) -> Value {
    let buttons: Vec<Value> = buttons
        .iter()
        .take(MAX_BUTTONS)
        .map(|b| {
            json!({
                "type": "reply",
                "reply": { "id": b.id, "title": truncate(&b.title, BUTTON_TITLE_MAX) },
            })
        })
        .collect();
    json!({
        "messaging_product": "whatsapp",
        "to": phone,
        "type": "interactive",
        "interactive": {
            "type": "button",
            "body": { "text": text },
            "action": { "buttons": buttons },
        },
    })
}

fn list_payload(phone: &str, text: &str, button_label: &str, rows: &[ListRow]) -> Value {
    let rows: Vec<Value> = rows
        .iter()
        .take(MAX_LIST_ROWS)
        .map(|row| {
            let mut value = json!({
                "id": row.id,
                "title": truncate(&row.title, ROW_TITLE_MAX),
            });
            if let Some(description) = row.description.as_deref().filter(|d| !d.is_empty()) {
                value["description"] = json!(truncate(description, ROW_DESCRIPTION_MAX));
            }
            value
        })
        .collect();
    json!({
        "messaging_product": "whatsapp",
        "to": phone,
        "type": "interactive",
        "interactive": {
            "type": "list",
            "body": { "text": text },
            "action": {
                "button": truncate(button_label, BUTTON_TITLE_MAX),
                "sections": [{ "rows": rows }],
            },
        },
    })
}

#[async_trait]
impl ChatGateway for WhatsAppClient {
    async fn send_text(&self, phone: &str, text: &str) -> PortResult<()> {
        self.post_message(phone, text_payload(phone, text)).await
    }

    async fn send_buttons(&self, phone: &str, text: &str, buttons: &[Button]) -> PortResult<()> {
        self.post_message(phone, buttons_payload(phone, text, buttons)).await
    }

    async fn send_list(
        &self,
        phone: &str,
        text: &str,
        button_label: &str,
        rows: &[ListRow],
    ) -> PortResult<()> {
        self.post_message(phone, list_payload(phone, text, button_label, rows))
            .await
    }
}

//=========================================================================================
// Inbound Webhook
//=========================================================================================

/// One customer message, reduced to what the dialogue engine consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub phone: String,
    /// The typed text, or the affordance id for button and list replies.
    pub text: String,
    pub message_type: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub entry: Vec<Entry>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Entry {
    #[serde(default)]
    pub changes: Vec<Change>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Change {
    #[serde(default)]
    pub field: String,
    #[serde(default)]
    pub value: ChangeValue,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChangeValue {
    #[serde(default)]
    pub messages: Vec<RawMessage>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawMessage {
    #[serde(default)]
    pub from: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    pub text: Option<RawText>,
    pub interactive: Option<RawInteractive>,
    pub button: Option<RawTemplateButton>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawText {
    #[serde(default)]
    pub body: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawInteractive {
    pub button_reply: Option<RawReply>,
    pub list_reply: Option<RawReply>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawReply {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawTemplateButton {
    #[serde(default)]
    pub payload: String,
    #[serde(default)]
    pub text: String,
}

fn first_non_empty(a: &str, b: &str) -> String {
    let chosen = if a.is_empty() { b } else { a };
    chosen.to_string()
}

impl RawMessage {
    fn flatten(&self) -> Option<InboundMessage> {
        let text = match self.kind.as_str() {
            "text" => self.text.as_ref()?.body.clone(),
            "interactive" => {
                let interactive = self.interactive.as_ref()?;
                let reply = interactive
                    .button_reply
                    .as_ref()
                    .or(interactive.list_reply.as_ref())?;
                first_non_empty(&reply.id, &reply.title)
            }
            "button" => {
                let button = self.button.as_ref()?;
                first_non_empty(&button.payload, &button.text)
            }
            _ => return None,
        };
        if self.from.is_empty() {
            return None;
        }
        Some(InboundMessage {
            phone: self.from.clone(),
            text,
            message_type: self.kind.clone(),
        })
    }
}

impl WebhookPayload {
    /// Every supported customer message in the envelope, in delivery order.
    /// Status callbacks and unsupported message kinds are skipped.
    pub fn messages(&self) -> Vec<InboundMessage> {
        self.entry
            .iter()
            .flat_map(|entry| entry.changes.iter())
            .filter(|change| change.field == "messages")
            .flat_map(|change| change.value.messages.iter())
            .filter_map(RawMessage::flatten)
            .collect()
    }
}

/// Answers a subscription handshake: returns the challenge to echo when the
/// mode and token are right.
pub fn verify_subscription(
    mode: Option<&str>,
    token: Option<&str>,
    challenge: Option<&str>,
    expected_token: &str,
) -> Option<String> {
    match (mode, token, challenge) {
        (Some("subscribe"), Some(token), Some(challenge)) if token == expected_token => {
            Some(challenge.to_string())
        }
        _ => None,
    }
}
