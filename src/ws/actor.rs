use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::state::AppState;
use crate::ws::protocol::{ClientMessage, Envelope};

/// Run the actor-per-connection pattern for an identified WebSocket.
///
/// Splits the WebSocket into reader and writer halves:
/// - Writer task: owns the sink, forwards messages from an mpsc channel
/// - Reader task: processes incoming control messages
///
/// The mpsc channel allows the dispatch path to push envelopes to this
/// device by cloning the sender held in the registry.
pub async fn run_connection(socket: WebSocket, state: AppState, device_id: String) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<Message>();

    // Register this connection, evicting any prior one for the same device.
    state.registry.register(&device_id, tx.clone());

    tracing::info!(
        device_id = %device_id,
        connections = state.registry.count(),
        "Device connected"
    );

    // Spawn writer task: forwards mpsc messages to the WebSocket sink.
    let writer_handle = tokio::spawn(writer_task(ws_sender, rx));

    // One-shot welcome. Best-effort: a failure here does not abort acceptance.
    if !state
        .dispatcher
        .send_to_device(&device_id, &Envelope::welcome(&device_id))
    {
        tracing::warn!(device_id = %device_id, "Welcome envelope not delivered");
    }

    // Reader loop: process incoming WebSocket messages.
    loop {
        match ws_receiver.next().await {
            Some(Ok(msg)) => match msg {
                Message::Text(text) => {
                    handle_control_message(&state, &device_id, text.as_str());
                }
                Message::Ping(data) => {
                    // Respond to protocol-level pings with pong.
                    let _ = tx.send(Message::Pong(data));
                }
                Message::Pong(_) => {}
                Message::Binary(_) => {
                    tracing::debug!(device_id = %device_id, "Ignoring binary frame");
                }
                Message::Close(frame) => {
                    tracing::info!(device_id = %device_id, reason = ?frame, "Client initiated close");
                    break;
                }
            },
            Some(Err(e)) => {
                tracing::warn!(device_id = %device_id, error = %e, "WebSocket receive error");
                break;
            }
            None => {
                // Stream ended — device disconnected.
                tracing::info!(device_id = %device_id, "WebSocket stream ended");
                break;
            }
        }
    }

    // Cleanup: stop the writer and drop this connection's registration.
    // Conditional removal: if this connection was already evicted by a
    // newer registration, the replacement stays in place.
    writer_handle.abort();
    state.registry.remove_if_current(&device_id, &tx);

    tracing::info!(
        device_id = %device_id,
        connections = state.registry.count(),
        "Device disconnected"
    );
}

/// Writer task: receives messages from the mpsc channel and forwards them
/// to the WebSocket sink.
async fn writer_task(
    mut ws_sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        if ws_sender.send(msg).await.is_err() {
            // WebSocket send failed — connection is broken.
            break;
        }
    }
}

/// Dispatch an inbound control message by type. Malformed payloads are
/// logged and ignored; the connection stays open.
fn handle_control_message(state: &AppState, device_id: &str, raw: &str) {
    let message: ClientMessage = match serde_json::from_str(raw) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::debug!(device_id = %device_id, error = %e, "Malformed control message");
            return;
        }
    };

    match message {
        ClientMessage::Ping => {
            // Device-level liveness ping; reply with a timestamped pong.
            state.dispatcher.send_to_device(device_id, &Envelope::pong());
        }
        ClientMessage::NotificationReceived { notification_id } => {
            tracing::info!(
                device_id = %device_id,
                notification_id = ?notification_id,
                "Delivery acknowledged by device"
            );
        }
        ClientMessage::Unknown => {
            tracing::debug!(device_id = %device_id, "Unknown control message type");
        }
    }
}
