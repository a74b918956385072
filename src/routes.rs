use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    Json, Router,
};
use serde_json::json;

use crate::state::AppState;
use crate::ws::handler as ws_handler;

/// Build the full axum Router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", axum::routing::get(health))
        .route("/stats", axum::routing::get(stats))
        .route("/queues/{name}/publish", axum::routing::post(publish))
        .route("/ws", axum::routing::get(ws_handler::ws_upgrade))
        .with_state(state)
}

/// GET /health — liveness probe with the current connection count.
async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "beacon-server",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "connections": state.registry.count(),
    }))
}

/// GET /stats — consumer counters plus the live connection snapshot.
/// Read-only; counters are mutated only by the consumer.
async fn stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "success": true,
        "stats": state.consumer.stats(),
        "websocket": {
            "totalConnections": state.registry.count(),
            "connectedDevices": state.registry.device_ids(),
        },
    }))
}

/// POST /queues/{name}/publish — embedded-mode producer entry. The body is
/// forwarded verbatim onto the named in-process queue; validation happens
/// at consume time, like with an external broker.
async fn publish(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<StatusCode, StatusCode> {
    if !state.broker.has_queue(&name) {
        return Err(StatusCode::NOT_FOUND);
    }

    state
        .broker
        .publish(&name, body.to_vec())
        .map_err(|e| {
            tracing::error!(queue = %name, error = %e, "Publish failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    Ok(StatusCode::ACCEPTED)
}
