//! Shared helpers for integration tests: spin up the real server on an
//! ephemeral port against an in-process broker.

use futures_util::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Start the server on a random port and return (base_url, addr, broker).
pub async fn start_test_server() -> (
    String,
    SocketAddr,
    beacon_server::queue::memory::MemoryBroker,
) {
    let registry = beacon_server::ws::DeviceRegistry::new();
    let dispatcher = beacon_server::dispatch::Dispatcher::new(registry.clone());
    let broker = beacon_server::queue::memory::MemoryBroker::new([
        "notifications.send",
        "notifications.bulk",
    ]);

    let consumer = Arc::new(beacon_server::consumer::ConsumerService::new(
        Arc::new(broker.clone()),
        dispatcher.clone(),
        beacon_server::consumer::QueueNames {
            single: "notifications.send".to_string(),
            bulk: "notifications.bulk".to_string(),
        },
        1,
    ));
    consumer.start().await.expect("Failed to start consumer");

    let state = beacon_server::state::AppState {
        registry,
        dispatcher,
        consumer,
        broker: broker.clone(),
    };

    let app = beacon_server::routes::build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), addr, broker)
}

/// Connect a device and drain the welcome envelope.
pub async fn connect_device(addr: SocketAddr, device_id: &str) -> WsStream {
    let ws_url = format!("ws://{}/ws?deviceId={}", addr, device_id);
    let (mut ws_stream, _) = tokio_tungstenite::connect_async(&ws_url)
        .await
        .expect("Failed to connect to WebSocket");

    // First message after registration is the welcome envelope.
    let welcome = recv_json(&mut ws_stream).await;
    assert_eq!(welcome["type"], "welcome");
    assert_eq!(welcome["data"]["deviceId"], device_id);

    ws_stream
}

/// Receive the next text frame and parse it as JSON.
pub async fn recv_json(stream: &mut WsStream) -> serde_json::Value {
    let msg = tokio::time::timeout(Duration::from_secs(2), stream.next())
        .await
        .expect("Expected message within timeout")
        .expect("Stream ended unexpectedly")
        .expect("WebSocket error");

    match msg {
        Message::Text(text) => serde_json::from_str(text.as_str()).expect("Invalid JSON frame"),
        other => panic!("Expected text frame, got: {:?}", other),
    }
}

/// Poll the stats endpoint until `condition` holds for the stats object.
pub async fn wait_for_stats<F>(base_url: &str, condition: F) -> serde_json::Value
where
    F: Fn(&serde_json::Value) -> bool,
{
    for _ in 0..100 {
        let resp: serde_json::Value = reqwest::get(format!("{}/stats", base_url))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if condition(&resp["stats"]) {
            return resp;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("Stats condition not reached within timeout");
}
