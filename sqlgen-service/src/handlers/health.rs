use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::services::get_metrics;
use crate::startup::AppState;

/// Liveness probe. `degraded` when the generator is not ready.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let database_connected = state.agent.database_connected().await;
    let generator_ready = state.agent.generator_ready().await;

    let status = if database_connected && generator_ready {
        "healthy"
    } else {
        "degraded"
    };
    let code = if database_connected {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(json!({
            "status": status,
            "service": state.service_name.as_str(),
            "version": env!("CARGO_PKG_VERSION"),
            "database_connected": database_connected,
            "generator": state.agent.generator_name(),
            "generator_ready": generator_ready
        })),
    )
}

/// Readiness probe.
pub async fn readiness_check(State(state): State<AppState>) -> StatusCode {
    if state.agent.database_connected().await {
        tracing::debug!("Readiness check passed");
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Prometheus text: service registry followed by HTTP middleware metrics.
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let mut body = get_metrics();
    if let Some(handle) = &state.http_metrics {
        body.push_str(&handle.render());
    }
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        body,
    )
}
