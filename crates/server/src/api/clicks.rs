// Click ingestion routes
// Decision: 202 Accepted, the evaluation itself happens after the debounce window

use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use linkeval_scheduler::{ClickEvent, SchedulerPhase};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::error;

use super::common::ErrorResponse;
use super::AppState;

/// Body of a recorded click
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordClickRequest {
    pub account_id: String,
    pub destination_url: String,
    #[serde(default)]
    pub destination_country_code: String,
}

/// Current schedule of a link
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleResponse {
    pub link_id: String,
    pub phase: SchedulerPhase,
    pub latest_payload: Option<ClickEvent>,
    /// Milliseconds until the pending fire, if armed
    pub fire_in_ms: Option<u64>,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/v1/links/:link_id/clicks", post(record_click))
        .route("/v1/links/:link_id/schedule", get(get_schedule))
        .with_state(state)
}

fn millis_until(deadline: Instant) -> u64 {
    let remaining: Duration = deadline.saturating_duration_since(Instant::now());
    remaining.as_millis() as u64
}

/// POST /v1/links/{link_id}/clicks - Record a click and (re)arm the link's timer
pub async fn record_click(
    State(state): State<AppState>,
    Path(link_id): Path<String>,
    Json(req): Json<RecordClickRequest>,
) -> Response {
    if req.account_id.trim().is_empty() {
        return ErrorResponse::new("accountId must not be empty")
            .into_response(StatusCode::BAD_REQUEST);
    }
    if req.destination_url.trim().is_empty() {
        return ErrorResponse::new("destinationUrl must not be empty")
            .into_response(StatusCode::BAD_REQUEST);
    }

    let event = ClickEvent::new(
        req.account_id,
        link_id.clone(),
        req.destination_url,
        req.destination_country_code,
    );

    match state.host.record_event(event).await {
        Ok(deadline) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({
                "linkId": link_id,
                "fireInMs": millis_until(deadline),
            })),
        )
            .into_response(),
        Err(e) => {
            error!(%link_id, error = %e, "failed to record click");
            ErrorResponse::from(&e).into_response(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// GET /v1/links/{link_id}/schedule - Inspect a link's scheduler
pub async fn get_schedule(
    State(state): State<AppState>,
    Path(link_id): Path<String>,
) -> Response {
    match state.host.state(&link_id).await {
        Ok(snapshot) => Json(ScheduleResponse {
            link_id,
            phase: snapshot.phase(),
            fire_in_ms: snapshot.timer_deadline.map(millis_until),
            latest_payload: snapshot.latest_payload,
        })
        .into_response(),
        Err(e) => {
            error!(%link_id, error = %e, "failed to read schedule");
            ErrorResponse::from(&e).into_response(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}
