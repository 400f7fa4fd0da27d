//! Health, liveness, and readiness endpoint handlers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;

use super::AppState;
use crate::network::HealthState;

/// Returns detailed health information as JSON.
///
/// Always returns 200; the `state` field and per-processor states tell
/// whether the gateway can actually serve.
pub async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let health = state.shutdown.health_state();

    Json(json!({
        "state": health.as_str(),
        "in_flight": state.shutdown.in_flight_count(),
        "rpc_connections": state.registry.count(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "processors": {
            "event": state.gateway.events.processor_states(),
            "action": state.gateway.actions.processor_states(),
        },
    }))
}

/// Liveness probe. Always 200 while the process responds.
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe: 200 only when the gateway is `Ready` and every
/// processor stream is open, 503 otherwise.
pub async fn readiness_handler(State(state): State<AppState>) -> StatusCode {
    let processors_open = state.gateway.events.is_healthy() && state.gateway.actions.is_healthy();
    if state.shutdown.health_state() == HealthState::Ready && processors_open {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
