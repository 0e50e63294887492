//! services/api/src/payments/webhook.rs
//!
//! Authenticity check and parsing of inbound payment-provider callbacks.
//!
//! Two shapes arrive on the same endpoint and are told apart by sniffing:
//!
//! * A till (buy-goods) callback has a top-level `topic` and describes the
//!   payment under `event.resource`. It never carries our order id, only the
//!   amount and the sender's phone in cleartext and/or hashed form.
//! * A push-charge result has `data.attributes`, with our order id in
//!   `metadata.order_id` and the overall outcome in `status`.

use crate::signature::verify_hmac_sha256;
use bar_bot_core::domain::PaymentWebhookResult;
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;
use uuid::Uuid;

pub const SIGNATURE_HEADER: &str = "x-kopokopo-signature";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WebhookError {
    #[error("missing or invalid webhook signature")]
    InvalidSignature,
    #[error("malformed webhook payload: {0}")]
    Malformed(String),
}

/// Verifies the callback signature. With no secret configured every callback
/// is accepted.
pub fn verify_signature(
    secret: Option<&str>,
    header: Option<&str>,
    raw_body: &[u8],
) -> Result<(), WebhookError> {
    let Some(secret) = secret else {
        return Ok(());
    };
    let signature = header.ok_or(WebhookError::InvalidSignature)?;
    if verify_hmac_sha256(secret.as_bytes(), raw_body, signature) {
        Ok(())
    } else {
        Err(WebhookError::InvalidSignature)
    }
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn amount(value: &Value) -> Option<Decimal> {
    text(value).and_then(|raw| Decimal::from_str(&raw).ok())
}

/// Parses a raw callback body into a [`PaymentWebhookResult`].
pub fn parse_webhook(raw_body: &[u8]) -> Result<PaymentWebhookResult, WebhookError> {
    let payload: Value = serde_json::from_slice(raw_body)
        .map_err(|e| WebhookError::Malformed(e.to_string()))?;

    if let Some(topic) = payload.get("topic").and_then(Value::as_str) {
        return Ok(parse_till_callback(topic, &payload));
    }
    if let Some(attributes) = payload.pointer("/data/attributes") {
        return Ok(parse_charge_result(attributes));
    }
    Err(WebhookError::Malformed(
        "neither a till callback nor a charge result".to_string(),
    ))
}

fn parse_till_callback(topic: &str, payload: &Value) -> PaymentWebhookResult {
    let resource = payload.pointer("/event/resource").unwrap_or(&Value::Null);
    let status = text(&resource["status"]).unwrap_or_default();
    // "Received" means the provider has seen the payment, not that it cleared.
    let success = topic.contains("transaction_received") && status == "Success";

    PaymentWebhookResult {
        order_id: None,
        reference: text(&resource["reference"]).unwrap_or_default(),
        amount: amount(&resource["amount"]),
        sender_phone: text(&resource["sender_phone_number"]),
        hashed_sender_phone: text(&resource["hashed_sender_phone"]),
        status,
        success,
    }
}

fn parse_charge_result(attributes: &Value) -> PaymentWebhookResult {
    let status = text(&attributes["status"]).unwrap_or_default();
    let resource = attributes.pointer("/event/resource").unwrap_or(&Value::Null);

    PaymentWebhookResult {
        order_id: text(&attributes["metadata"]["order_id"]).and_then(|id| Uuid::parse_str(&id).ok()),
        reference: text(&resource["reference"]).unwrap_or_default(),
        amount: amount(&resource["amount"]),
        sender_phone: text(&resource["sender_phone_number"]),
        hashed_sender_phone: None,
        success: status.eq_ignore_ascii_case("success"),
        status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::sign_hmac_sha256;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn till_callback(status: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "topic": "buygoods_transaction_received",
            "id": "2133dbfb-24b9-40fc-ae57-2d7559785760",
            "event": {
                "type": "Buygoods Transaction",
                "resource": {
                    "amount": "1500.0",
                    "status": status,
                    "reference": "OJM6Q1W84K",
                    "sender_phone_number": "+254708116809",
                    "hashed_sender_phone": "abc123"
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn till_callback_success_requires_exact_status() {
        let result = parse_webhook(&till_callback("Success")).unwrap();
        assert!(result.success);
        assert_eq!(result.order_id, None);
        assert_eq!(result.amount, Some(dec!(1500)));
        assert_eq!(result.sender_phone.as_deref(), Some("+254708116809"));
        assert_eq!(result.hashed_sender_phone.as_deref(), Some("abc123"));
        assert_eq!(result.reference, "OJM6Q1W84K");

        assert!(!parse_webhook(&till_callback("Received")).unwrap().success);
        assert!(!parse_webhook(&till_callback("success")).unwrap().success);
    }

    #[test]
    fn other_topics_are_never_success() {
        let body = serde_json::to_vec(&json!({
            "topic": "customer_created",
            "event": { "resource": { "status": "Success", "amount": "10" } }
        }))
        .unwrap();
        assert!(!parse_webhook(&body).unwrap().success);
    }

    #[test]
    fn charge_result_carries_the_order_id() {
        let order_id = Uuid::new_v4();
        let body = serde_json::to_vec(&json!({
            "data": {
                "id": "cac95329-9fa5-42f1-a4fc-c08af7b868fb",
                "type": "incoming_payment",
                "attributes": {
                    "status": "SUCCESS",
                    "event": {
                        "type": "Incoming Payment Request",
                        "resource": {
                            "reference": "OJM6Q1W84K",
                            "amount": 1500,
                            "sender_phone_number": "+254708116809"
                        }
                    },
                    "metadata": { "order_id": order_id.to_string() }
                }
            }
        }))
        .unwrap();

        let result = parse_webhook(&body).unwrap();
        assert!(result.success);
        assert_eq!(result.order_id, Some(order_id));
        assert_eq!(result.amount, Some(dec!(1500)));
    }

    #[test]
    fn failed_charge_without_resource_still_parses() {
        let order_id = Uuid::new_v4();
        let body = serde_json::to_vec(&json!({
            "data": { "attributes": {
                "status": "Failed",
                "event": { "resource": null, "errors": "The initiator cancelled the request" },
                "metadata": { "order_id": order_id.to_string() }
            } }
        }))
        .unwrap();
        let result = parse_webhook(&body).unwrap();
        assert!(!result.success);
        assert_eq!(result.order_id, Some(order_id));
        assert_eq!(result.amount, None);
    }

    #[test]
    fn unknown_shapes_and_garbage_are_malformed() {
        assert!(matches!(parse_webhook(b"{\"hello\":1}"), Err(WebhookError::Malformed(_))));
        assert!(matches!(parse_webhook(b"not json"), Err(WebhookError::Malformed(_))));
    }

    #[test]
    fn signature_is_checked_only_when_a_secret_is_configured() {
        let body = till_callback("Success");
        assert_eq!(verify_signature(None, None, &body), Ok(()));

        let sig = format!("sha256={}", sign_hmac_sha256(b"s3cret", &body));
        assert_eq!(verify_signature(Some("s3cret"), Some(&sig), &body), Ok(()));
        assert_eq!(
            verify_signature(Some("s3cret"), None, &body),
            Err(WebhookError::InvalidSignature)
        );
        assert_eq!(
            verify_signature(Some("s3cret"), Some("sha256=00"), &body),
            Err(WebhookError::InvalidSignature)
        );
    }
}
