//! services/api/src/adapters/kopokopo.rs
//!
//! Kopo Kopo adapter: the outbound `PaymentGateway` that pushes M-PESA STK
//! charge prompts. Authenticates with a static bearer token when configured,
//! otherwise with a cached OAuth client-credentials token.

use async_trait::async_trait;
use bar_bot_core::domain::{whole_shillings, ChargeRequest};
use bar_bot_core::phone::{mask, to_provider_format};
use bar_bot_core::ports::{PaymentGateway, PortError, PortResult};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};

/// Refresh this long before the provider says a token expires.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(5 * 60);
const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 3600;
const PAYMENT_CHANNEL: &str = "M-PESA STK Push";

#[derive(Clone, Debug)]
pub enum Credentials {
    Static(String),
    OAuth {
        client_id: String,
        client_secret: String,
    },
}

#[derive(Clone, Debug)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self, now: Instant) -> bool {
        now + TOKEN_REFRESH_MARGIN < self.expires_at
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: i64,
}

pub struct KopoKopoClient {
    http: reqwest::Client,
    base_url: String,
    till_number: String,
    callback_url: String,
    credentials: Credentials,
    token: Mutex<Option<CachedToken>>,
}

impl KopoKopoClient {
    pub fn new(
        base_url: &str,
        till_number: &str,
        callback_url: &str,
        credentials: Credentials,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("bar-bot/1.0")
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            till_number: till_number.to_string(),
            callback_url: callback_url.to_string(),
            credentials,
            token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> PortResult<String> {
        let (client_id, client_secret) = match &self.credentials {
            Credentials::Static(token) => return Ok(token.clone()),
            Credentials::OAuth {
                client_id,
                client_secret,
            } => (client_id, client_secret),
        };

        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(Instant::now())) {
            return Ok(token.value.clone());
        }

        let url = format!("{}/oauth/token", self.base_url);
        let response = self
            .http
            .post(&url)
            .form(&[
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await
            .map_err(|e| PortError::Unexpected(format!("token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PortError::Unexpected(format!(
                "oauth token error: status {status}, body: {body}"
            )));
        }
        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|e| PortError::Unexpected(format!("parse token response: {e}")))?;

        let lifetime = u64::try_from(parsed.expires_in)
            .ok()
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
        let token = CachedToken {
            value: parsed.access_token,
            expires_at: Instant::now() + Duration::from_secs(lifetime),
        };
        info!(expires_in = lifetime, "Fetched Kopo Kopo access token");
        let value = token.value.clone();
        *cached = Some(token);
        Ok(value)
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }

    async fn post_charge(&self, payload: &Value, token: &str) -> PortResult<reqwest::Response> {
        let url = format!("{}/api/v1/incoming_payments", self.base_url);
        self.http
            .post(&url)
            .bearer_auth(token)
            .json(payload)
            .send()
            .await
            .map_err(|e| PortError::Unexpected(format!("STK push request failed: {e}")))
    }
}

/// Whole shillings, as the provider expects the amount value.
fn whole_units(amount: Decimal) -> String {
    whole_shillings(amount).to_string()
}

pub(crate) fn charge_payload(request: &ChargeRequest, till_number: &str, callback_url: &str) -> Value {
    json!({
        "payment_channel": PAYMENT_CHANNEL,
        "till_number": till_number,
        "subscriber": { "phone_number": to_provider_format(&request.phone) },
        "amount": { "currency": "KES", "value": whole_units(request.amount) },
        "metadata": { "order_id": request.order_id.to_string() },
        "_links": { "callback_url": callback_url },
    })
}

#[async_trait]
impl PaymentGateway for KopoKopoClient {
    async fn initiate_charge(&self, request: &ChargeRequest) -> PortResult<Option<String>> {
        let payload = charge_payload(request, &self.till_number, &self.callback_url);

        let token = self.access_token().await?;
        let mut response = self.post_charge(&payload, &token).await?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED
            && matches!(self.credentials, Credentials::OAuth { .. })
        {
            warn!("Kopo Kopo rejected the cached token; refreshing once");
            self.invalidate_token().await;
            let token = self.access_token().await?;
            response = self.post_charge(&payload, &token).await?;
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PortError::Unexpected(format!(
                "kopokopo API error: status {status}, body: {body}"
            )));
        }

        let reference = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        info!(
            order_id = %request.order_id,
            phone = %mask(&request.phone),
            amount = %request.amount,
            reference = reference.as_deref().unwrap_or(""),
            "STK push accepted"
        );
        Ok(reference)
    }
}
