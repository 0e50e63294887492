//! services/api/src/web/staff.rs
//!
//! Authenticated bar-staff endpoints: order hand-over actions and the live
//! operations feed.

use crate::orders::LifecycleError;
use crate::web::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json,
    },
    Extension,
};
use bar_bot_core::domain::{Order, TransitionOutcome};
use futures::Stream;
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, warn};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Serialize, ToSchema)]
pub struct OrderActionResponse {
    pub order_id: Uuid,
    pub status: String,
    pub pickup_code: String,
    /// True when the order was already in the requested state.
    pub already_applied: bool,
}

impl OrderActionResponse {
    fn new(order: Order, outcome: TransitionOutcome) -> Self {
        Self {
            order_id: order.id,
            status: order.status.to_string(),
            pickup_code: order.pickup_code,
            already_applied: outcome == TransitionOutcome::AlreadyApplied,
        }
    }
}

fn lifecycle_error(e: LifecycleError) -> (StatusCode, String) {
    match e {
        LifecycleError::NotFound(_) => (StatusCode::NOT_FOUND, e.to_string()),
        LifecycleError::InvalidTransition(_) => (StatusCode::CONFLICT, e.to_string()),
        LifecycleError::Port(port) => {
            error!("Staff order action failed: {:?}", port);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to update order".to_string(),
            )
        }
    }
}

//=========================================================================================
// Order Actions
//=========================================================================================

/// Mark a paid order as ready for pickup. The customer is notified once.
#[utoipa::path(
    post,
    path = "/staff/orders/{id}/ready",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order is ready", body = OrderActionResponse),
        (status = 401, description = "Not logged in"),
        (status = 404, description = "Unknown order"),
        (status = 409, description = "Order is not PAID")
    )
)]
pub async fn mark_ready_handler(
    State(state): State<Arc<AppState>>,
    Extension(staff_id): Extension<Uuid>,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let actor = staff_id.to_string();
    let (order, outcome) = state
        .lifecycle
        .mark_ready(order_id, Some(&actor))
        .await
        .map_err(lifecycle_error)?;
    Ok(Json(OrderActionResponse::new(order, outcome)))
}

/// Mark a ready order as collected.
#[utoipa::path(
    post,
    path = "/staff/orders/{id}/complete",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "Order is completed", body = OrderActionResponse),
        (status = 401, description = "Not logged in"),
        (status = 404, description = "Unknown order"),
        (status = 409, description = "Order is not READY")
    )
)]
pub async fn mark_completed_handler(
    State(state): State<Arc<AppState>>,
    Extension(staff_id): Extension<Uuid>,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let actor = staff_id.to_string();
    let (order, outcome) = state
        .lifecycle
        .mark_completed(order_id, Some(&actor))
        .await
        .map_err(lifecycle_error)?;
    Ok(Json(OrderActionResponse::new(order, outcome)))
}

//=========================================================================================
// Live Feed
//=========================================================================================

/// Server-Sent Events stream of order events for the bar dashboard.
///
/// Each event is named after its kind (`new_order`, `order_ready`, ...) and
/// carries the JSON-encoded event. A slow client skips what it missed.
#[utoipa::path(
    get,
    path = "/staff/events",
    responses(
        (status = 200, description = "Event stream", body = String, content_type = "text/event-stream"),
        (status = 401, description = "Not logged in")
    )
)]
pub async fn events_handler(
    State(state): State<Arc<AppState>>,
    Extension(staff_id): Extension<Uuid>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut feed = state.events.subscribe();

    let stream = async_stream::stream! {
        loop {
            match feed.recv().await {
                Ok(event) => match Event::default().event(event.name()).json_data(&event) {
                    Ok(sse) => yield Ok(sse),
                    Err(e) => error!("Failed to encode ops event: {}", e),
                },
                Err(RecvError::Lagged(missed)) => {
                    warn!(%staff_id, missed, "Live feed subscriber lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

#[cfg(test)]
mod tests {
    use crate::testing::{Harness, CUSTOMER};
    use crate::web::test_support::{app_with_staff, bartender, login_cookie};
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use bar_bot_core::domain::OrderStatus;
    use futures::StreamExt;
    use rust_decimal_macros::dec;
    use tower::ServiceExt;
    use uuid::Uuid;

    fn action(uri: String, cookie: Option<&str>) -> Request<Body> {
        let mut request = Request::post(uri);
        if let Some(cookie) = cookie {
            request = request.header(header::COOKIE, cookie);
        }
        request.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn staff_actions_require_a_session() {
        let harness = Harness::new();
        let order = harness.seed_pending_order(CUSTOMER, dec!(1500));
        harness.orders.set_status(order.id, OrderStatus::Paid);
        let (app, _) = app_with_staff(&harness, vec![bartender("Wanjiru", "4321")]);

        let anonymous = app
            .clone()
            .oneshot(action(format!("/staff/orders/{}/ready", order.id), None))
            .await
            .unwrap();
        assert_eq!(anonymous.status(), StatusCode::UNAUTHORIZED);

        let forged = app
            .oneshot(action(
                format!("/staff/orders/{}/ready", order.id),
                Some("staff_session=forged"),
            ))
            .await
            .unwrap();
        assert_eq!(forged.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(harness.orders.get(order.id).unwrap().status, OrderStatus::Paid);
    }

    #[tokio::test]
    async fn ready_then_complete_records_the_staff_member() {
        let harness = Harness::new();
        let order = harness.seed_pending_order(CUSTOMER, dec!(1500));
        harness.orders.set_status(order.id, OrderStatus::Paid);
        let wanjiru = bartender("Wanjiru", "4321");
        let staff_id = wanjiru.id;
        let (app, _) = app_with_staff(&harness, vec![wanjiru]);
        let cookie = login_cookie(&app, "4321").await;

        let ready = app
            .clone()
            .oneshot(action(format!("/staff/orders/{}/ready", order.id), Some(&cookie)))
            .await
            .unwrap();
        assert_eq!(ready.status(), StatusCode::OK);
        let body = to_bytes(ready.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "READY");
        assert_eq!(json["already_applied"], false);

        let again = app
            .clone()
            .oneshot(action(format!("/staff/orders/{}/ready", order.id), Some(&cookie)))
            .await
            .unwrap();
        let body = to_bytes(again.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["already_applied"], true);

        let complete = app
            .oneshot(action(format!("/staff/orders/{}/complete", order.id), Some(&cookie)))
            .await
            .unwrap();
        assert_eq!(complete.status(), StatusCode::OK);

        let stored = harness.orders.get(order.id).unwrap();
        assert_eq!(stored.status, OrderStatus::Completed);
        assert_eq!(stored.ready_by, Some(staff_id.to_string()));
        assert_eq!(stored.completed_by, Some(staff_id.to_string()));
    }

    #[tokio::test]
    async fn conflicts_and_unknown_orders_map_to_http_errors() {
        let harness = Harness::new();
        let pending = harness.seed_pending_order(CUSTOMER, dec!(1500));
        let (app, _) = app_with_staff(&harness, vec![bartender("Wanjiru", "4321")]);
        let cookie = login_cookie(&app, "4321").await;

        let conflict = app
            .clone()
            .oneshot(action(format!("/staff/orders/{}/complete", pending.id), Some(&cookie)))
            .await
            .unwrap();
        assert_eq!(conflict.status(), StatusCode::CONFLICT);

        let missing = app
            .oneshot(action(format!("/staff/orders/{}/ready", Uuid::new_v4()), Some(&cookie)))
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn live_feed_streams_order_events() {
        let harness = Harness::new();
        let order = harness.seed_pending_order(CUSTOMER, dec!(1500));
        harness.orders.set_status(order.id, OrderStatus::Paid);
        let (app, _) = app_with_staff(&harness, vec![bartender("Wanjiru", "4321")]);
        let cookie = login_cookie(&app, "4321").await;

        let response = app
            .oneshot(
                Request::get("/staff/events")
                    .header(header::COOKIE, &cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );

        harness.lifecycle.mark_ready(order.id, None).await.unwrap();

        let mut body = response.into_body().into_data_stream();
        let chunk = body.next().await.unwrap().unwrap();
        let text = String::from_utf8(chunk.to_vec()).unwrap();
        assert!(text.contains("event: order_ready"));
        assert!(text.contains(&order.id.to_string()));
    }
}
