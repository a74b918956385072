use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use serde::Deserialize;

use crate::state::AppState;
use crate::ws::actor;

/// Query parameters for WebSocket connection. Devices identify themselves
/// via ?deviceId= on the upgrade request.
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(rename = "deviceId", default)]
    pub device_id: String,
}

/// WebSocket close codes:
/// 4000 = device identity missing
/// 4500 = internal error during accept
const CLOSE_IDENTITY_REQUIRED: u16 = 4000;
#[allow(dead_code)]
pub(crate) const CLOSE_INTERNAL_ERROR: u16 = 4500;

/// GET /ws?deviceId=...
/// WebSocket upgrade endpoint. A missing or empty deviceId is rejected by
/// upgrading and immediately closing with code 4000 — such a connection
/// never enters the registry. On success, spawns an actor for the
/// connection.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(params): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let device_id = params.device_id.trim().to_string();

    if device_id.is_empty() {
        tracing::warn!("WebSocket connection rejected: deviceId not supplied");
        return ws.on_upgrade(move |mut socket: WebSocket| async move {
            let _ = socket
                .send(Message::Close(Some(CloseFrame {
                    code: CLOSE_IDENTITY_REQUIRED,
                    reason: "deviceId required".into(),
                })))
                .await;
        });
    }

    tracing::info!(device_id = %device_id, "Device connecting");
    ws.on_upgrade(move |socket| actor::run_connection(socket, state, device_id))
}
