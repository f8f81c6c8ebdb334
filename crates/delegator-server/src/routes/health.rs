//! `GET /api/v1/health` (§6's Ambient addendum).

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::routing::get;
use delegator_core::contingency::HealthReport;
use serde::Serialize;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(flatten)]
    pub report: HealthReport,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let report = state.contingency.health().await;
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        report,
    })
}
