//! WebSocket wire protocol.
//!
//! JSON envelopes in both directions. Inbound messages are simple control
//! frames from devices (liveness ping, delivery acknowledgment); outbound
//! envelopes carry notifications, pong replies, and the post-registration
//! welcome. The delivery timestamp is stamped at send time by the
//! dispatcher, not here.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Inbound control message from a device.
/// Unknown types deserialize to `Unknown` and are ignored by the actor.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping,
    NotificationReceived {
        #[serde(rename = "notificationId")]
        notification_id: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

/// Outbound envelope. `timestamp` is filled in by the dispatcher at send
/// time so it reflects the actual delivery attempt.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    pub data: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeKind {
    Welcome,
    Notification,
    Pong,
}

impl Envelope {
    pub fn new(kind: EnvelopeKind, data: Value) -> Self {
        Self {
            kind,
            data,
            timestamp: None,
        }
    }

    /// Welcome envelope sent once after successful registration.
    pub fn welcome(device_id: &str) -> Self {
        Self::new(
            EnvelopeKind::Welcome,
            serde_json::json!({
                "message": "connected to notification service",
                "deviceId": device_id,
            }),
        )
    }

    /// Pong reply to a device-level ping control message.
    pub fn pong() -> Self {
        Self::new(EnvelopeKind::Pong, serde_json::json!({}))
    }
}
