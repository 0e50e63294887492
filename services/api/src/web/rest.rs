//! services/api/src/web/rest.rs
//!
//! The master definition for the OpenAPI specification.

use crate::events::{EventItem, OpsEvent};
use crate::web::auth::{self, StaffLoginRequest, StaffLoginResponse};
use crate::web::staff::{self, OrderActionResponse};
use crate::web::webhooks::{self, WebhookAck};
use utoipa::OpenApi;

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        webhooks::verify_chat_webhook_handler,
        webhooks::receive_chat_webhook_handler,
        webhooks::payment_webhook_handler,
        auth::staff_login_handler,
        auth::staff_logout_handler,
        staff::mark_ready_handler,
        staff::mark_completed_handler,
        staff::events_handler,
    ),
    components(
        schemas(
            WebhookAck,
            StaffLoginRequest,
            StaffLoginResponse,
            OrderActionResponse,
            OpsEvent,
            EventItem
        )
    ),
    tags(
        (name = "Bar Bot API", description = "Chat and payment webhooks plus the bar staff dashboard endpoints.")
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_lists_every_route() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&str> = doc.paths.paths.keys().map(String::as_str).collect();
        for path in [
            "/webhooks/whatsapp",
            "/webhooks/payments",
            "/staff/login",
            "/staff/logout",
            "/staff/orders/{id}/ready",
            "/staff/orders/{id}/complete",
            "/staff/events",
        ] {
            assert!(paths.contains(&path), "missing {path}");
        }
    }
}
