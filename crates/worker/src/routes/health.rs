//! Health check endpoint.

use axum::Json;
use axum::extract::State;
use saga::SagaEngine;
use serde::Serialize;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub running_sagas: usize,
}

/// GET /health: returns worker health and the number of sagas in flight.
pub async fn check(State(engine): State<SagaEngine>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        running_sagas: engine.running_count().await,
    })
}
