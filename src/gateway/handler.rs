//! Liveness, readiness and status endpoints

use super::status::{RuntimeStatus, StatusTracker};
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Build the health router
pub fn health_router(tracker: Arc<StatusTracker>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness))
        .route("/status", get(get_status))
        .layer(TraceLayer::new_for_http())
        .with_state(tracker)
}

#[derive(Debug, Serialize)]
struct StateResponse {
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    status: &'static str,
    snapshot: RuntimeStatus,
}

async fn health_check() -> impl IntoResponse {
    Json(StateResponse { status: "ok" })
}

async fn readiness(State(tracker): State<Arc<StatusTracker>>) -> impl IntoResponse {
    if tracker.ready().await {
        (StatusCode::OK, Json(StateResponse { status: "ready" }))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(StateResponse { status: "not_ready" }),
        )
    }
}

async fn get_status(State(tracker): State<Arc<StatusTracker>>) -> impl IntoResponse {
    Json(StatusResponse {
        status: "ok",
        snapshot: tracker.snapshot().await,
    })
}
