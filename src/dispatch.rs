//! Outbound dispatch engine.
//!
//! Looks a device up in the registry and pushes an envelope down its
//! connection channel. There is no active health-checking: a failed send
//! means the connection is gone, so it is removed from the registry on the
//! spot and the send is reported as a miss.

use axum::extract::ws::Message;
use chrono::Utc;

use crate::ws::protocol::Envelope;
use crate::ws::{ConnectionSender, DeviceRegistry};

#[derive(Clone)]
pub struct Dispatcher {
    registry: DeviceRegistry,
}

impl Dispatcher {
    pub fn new(registry: DeviceRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Attempt delivery to a single device. Returns true iff the device had
    /// a live connection and the send went through. An offline device is a
    /// normal outcome, not an error.
    pub fn send_to_device(&self, device_id: &str, envelope: &Envelope) -> bool {
        let Some(sender) = self.registry.get(device_id) else {
            return false;
        };

        if sender.is_closed() {
            // Connection already gone; drop the stale mapping lazily.
            self.registry.remove_if_current(device_id, &sender);
            return false;
        }

        match self.push(&sender, envelope) {
            Ok(()) => {
                tracing::debug!(device_id = %device_id, kind = ?envelope.kind, "Envelope sent");
                true
            }
            Err(()) => {
                tracing::warn!(device_id = %device_id, "Send failed, removing connection");
                self.registry.remove_if_current(device_id, &sender);
                false
            }
        }
    }

    /// Send an envelope to every live connection. A per-connection failure
    /// removes that connection and the broadcast continues with the rest.
    /// Returns the number of successful sends.
    pub fn broadcast(&self, envelope: &Envelope) -> usize {
        let mut sent = 0;

        for (device_id, sender) in self.registry.snapshot() {
            if sender.is_closed() {
                self.registry.remove_if_current(&device_id, &sender);
                continue;
            }
            match self.push(&sender, envelope) {
                Ok(()) => sent += 1,
                Err(()) => {
                    tracing::warn!(device_id = %device_id, "Broadcast send failed, removing connection");
                    self.registry.remove_if_current(&device_id, &sender);
                }
            }
        }

        tracing::debug!(sent = sent, "Broadcast complete");
        sent
    }

    /// Stamp the delivery timestamp and push the serialized envelope onto
    /// the connection channel.
    fn push(&self, sender: &ConnectionSender, envelope: &Envelope) -> Result<(), ()> {
        let mut stamped = envelope.clone();
        stamped.timestamp = Some(Utc::now().to_rfc3339());

        let text = serde_json::to_string(&stamped).map_err(|_| ())?;
        sender.send(Message::Text(text.into())).map_err(|_| ())
    }
}
