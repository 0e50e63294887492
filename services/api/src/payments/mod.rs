//! services/api/src/payments/mod.rs
//!
//! Outbound charge dispatch and inbound payment callback handling.

pub mod dispatch;
pub mod reconciler;
pub mod webhook;

pub use dispatch::{DispatchError, DispatchQueue, DispatchSettings, DispatchWorker, Enqueued};
pub use reconciler::{PaymentReconciler, ReconcileOutcome};
pub use webhook::{parse_webhook, verify_signature, WebhookError};
