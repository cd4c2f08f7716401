// HTTP API
//
// Public ingestion routes plus health. Each route module owns its DTOs.

mod clicks;
mod common;

use std::sync::Arc;

use axum::{routing::get, Json, Router};
use linkeval_scheduler::SchedulerHost;
use serde::Serialize;
use tower_http::trace::TraceLayer;

pub use clicks::{RecordClickRequest, ScheduleResponse};
pub use common::ErrorResponse;

/// State shared by all routes
#[derive(Clone)]
pub struct AppState {
    pub host: Arc<SchedulerHost>,
}

impl AppState {
    pub fn new(host: Arc<SchedulerHost>) -> Self {
        Self { host }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Build the full application router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(clicks::routes(state))
        .layer(TraceLayer::new_for_http())
}
