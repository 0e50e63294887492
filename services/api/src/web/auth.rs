//! services/api/src/web/auth.rs
//!
//! Staff PIN login and logout for the bar dashboard.

use crate::web::state::AppState;
use argon2::{
    password_hash::{PasswordHash, PasswordVerifier},
    Argon2,
};
use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use bar_bot_core::domain::StaffUser;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

pub const SESSION_COOKIE: &str = "staff_session";
const SESSION_HOURS: i64 = 12;

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct StaffLoginRequest {
    /// The staff member's 4-digit PIN.
    pub pin: String,
}

#[derive(Serialize, ToSchema)]
pub struct StaffLoginResponse {
    pub staff_id: Uuid,
    pub name: String,
    pub role: String,
}

/// Reads the staff session id from the request cookies.
pub fn session_cookie(headers: &HeaderMap) -> Option<&str> {
    let prefix = format!("{SESSION_COOKIE}=");
    headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())?
        .split(';')
        .find_map(|c| c.trim().strip_prefix(prefix.as_str()))
        .filter(|id| !id.is_empty())
}

fn pin_matches(staff: &StaffUser, pin: &str) -> bool {
    match PasswordHash::new(&staff.pin_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(pin.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            warn!(staff_id = %staff.id, error = %e, "Unreadable PIN hash");
            false
        }
    }
}

//=========================================================================================
// Handlers
//=========================================================================================

/// POST /staff/login - Log in with a staff PIN
#[utoipa::path(
    post,
    path = "/staff/login",
    request_body = StaffLoginRequest,
    responses(
        (status = 200, description = "Login successful", body = StaffLoginResponse),
        (status = 400, description = "PIN is not 4 digits"),
        (status = 401, description = "Invalid PIN"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn staff_login_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StaffLoginRequest>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let pin = req.pin.trim();
    if pin.len() != 4 || !pin.chars().all(|c| c.is_ascii_digit()) {
        return Err((StatusCode::BAD_REQUEST, "PIN must be 4 digits".to_string()));
    }

    let staff = state.staff.list_active_staff().await.map_err(|e| {
        error!("Failed to load staff: {:?}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, "Authentication error".to_string())
    })?;
    let member = staff
        .into_iter()
        .find(|member| pin_matches(member, pin))
        .ok_or_else(|| (StatusCode::UNAUTHORIZED, "Invalid PIN".to_string()))?;

    let session_id = Uuid::new_v4().to_string();
    let expires_at = Utc::now() + Duration::hours(SESSION_HOURS);
    state
        .staff
        .create_staff_session(&session_id, member.id, expires_at)
        .await
        .map_err(|e| {
            error!("Failed to create staff session: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to create session".to_string())
        })?;
    info!(staff_id = %member.id, role = member.role.as_str(), "Staff logged in");

    let cookie = format!(
        "{SESSION_COOKIE}={}; HttpOnly; Secure; SameSite=Lax; Path=/; Max-Age={}",
        session_id,
        Duration::hours(SESSION_HOURS).num_seconds()
    );
    let response = StaffLoginResponse {
        staff_id: member.id,
        name: member.name,
        role: member.role.as_str().to_string(),
    };

    Ok((StatusCode::OK, [(header::SET_COOKIE, cookie)], Json(response)))
}

/// POST /staff/logout - Revoke the staff session
#[utoipa::path(
    post,
    path = "/staff/logout",
    responses(
        (status = 200, description = "Logout successful"),
        (status = 401, description = "No active session")
    )
)]
pub async fn staff_logout_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let session_id = session_cookie(&headers)
        .ok_or((StatusCode::UNAUTHORIZED, "No session found".to_string()))?;

    state
        .staff
        .delete_staff_session(session_id)
        .await
        .map_err(|e| {
            error!("Failed to delete staff session: {:?}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to logout".to_string())
        })?;

    let cookie = format!("{SESSION_COOKIE}=; HttpOnly; Secure; SameSite=Lax; Path=/; Max-Age=0");
    Ok((StatusCode::OK, [(header::SET_COOKIE, cookie)]))
}
