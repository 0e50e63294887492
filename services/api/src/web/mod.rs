pub mod auth;
pub mod middleware;
pub mod rest;
pub mod staff;
pub mod state;
pub mod webhooks;

pub use middleware::require_staff;

use axum::{
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use state::AppState;
use std::sync::Arc;

const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Builds the API router: provider webhooks and staff login are public, the
/// staff order actions and live feed sit behind `require_staff`.
pub fn router(state: Arc<AppState>) -> Router {
    let public_routes = Router::new()
        .route(
            "/webhooks/whatsapp",
            get(webhooks::verify_chat_webhook_handler).post(webhooks::receive_chat_webhook_handler),
        )
        .route("/webhooks/payments", post(webhooks::payment_webhook_handler))
        .route("/staff/login", post(auth::staff_login_handler))
        .route("/staff/logout", post(auth::staff_logout_handler));

    let protected_routes = Router::new()
        .route("/staff/orders/{id}/ready", post(staff::mark_ready_handler))
        .route("/staff/orders/{id}/complete", post(staff::mark_completed_handler))
        .route("/staff/events", get(staff::events_handler))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            require_staff,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}
