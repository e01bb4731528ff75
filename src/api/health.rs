//! Health check endpoint

use std::sync::Arc;

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use super::ApiState;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub database: &'static str,
}

/// Build the health route
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .with_state(state)
}

/// Liveness plus a database reachability check
async fn health(State(state): State<Arc<ApiState>>) -> Json<HealthResponse> {
    let database = state
        .db
        .get()
        .ok()
        .and_then(|conn| conn.query_row("SELECT 1", [], |row| row.get::<_, i32>(0)).ok())
        .map_or("fail", |_| "ok");

    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        database,
    })
}
