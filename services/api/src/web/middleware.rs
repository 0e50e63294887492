//! services/api/src/web/middleware.rs
//!
//! Authentication middleware for the staff routes.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::warn;

use crate::web::auth::session_cookie;
use crate::web::state::AppState;

/// Middleware that validates the staff session cookie.
///
/// If valid, inserts the staff id (`Uuid`) into request extensions for handlers to use.
/// If invalid, expired or missing, returns 401 Unauthorized.
pub async fn require_staff(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let session_id = session_cookie(req.headers()).ok_or(StatusCode::UNAUTHORIZED)?;

    let staff_id = state
        .staff
        .validate_staff_session(session_id)
        .await
        .map_err(|e| {
            warn!("Rejected staff session: {}", e);
            StatusCode::UNAUTHORIZED
        })?;

    req.extensions_mut().insert(staff_id);
    Ok(next.run(req).await)
}
