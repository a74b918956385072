//! Device connection registry.
//!
//! In-memory map from device identity to its single live WebSocket
//! connection. A device that reconnects evicts its previous connection
//! ("most recent connection wins"). All device→connection bookkeeping goes
//! through this type; nothing else touches the underlying map.

use axum::extract::ws::{CloseFrame, Message};
use dashmap::DashMap;
use std::sync::Arc;

use crate::ws::ConnectionSender;

/// Close code sent to a connection that was replaced by a newer one
/// for the same device.
const CLOSE_SUPERSEDED: u16 = 1000;

/// Registry of active device connections. Cheap to clone; all clones share
/// the same map. Safe for concurrent use from connection lifecycle events
/// and the dispatch path (DashMap is the serialization point).
#[derive(Clone, Default)]
pub struct DeviceRegistry {
    inner: Arc<DashMap<String, ConnectionSender>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection for a device. If the device already holds a
    /// connection, that connection is evicted: it receives a close frame
    /// (best-effort) and its mapping is replaced.
    pub fn register(&self, device_id: &str, sender: ConnectionSender) {
        let prior = self.inner.insert(device_id.to_string(), sender);

        if let Some(old) = prior {
            tracing::info!(device_id = %device_id, "Evicting previous connection");
            let _ = old.send(Message::Close(Some(CloseFrame {
                code: CLOSE_SUPERSEDED,
                reason: "superseded by newer connection".into(),
            })));
        }
    }

    /// Remove a device's mapping unconditionally. Idempotent.
    pub fn remove(&self, device_id: &str) {
        self.inner.remove(device_id);
    }

    /// Remove a device's mapping only if the registered sender is the same
    /// channel as `sender`. Used by lifecycle cleanup and dispatch failure
    /// paths so that a stale connection's teardown cannot unregister the
    /// connection that replaced it.
    pub fn remove_if_current(&self, device_id: &str, sender: &ConnectionSender) {
        self.inner
            .remove_if(device_id, |_, registered| registered.same_channel(sender));
    }

    /// Look up the sender for a device, if registered.
    pub fn get(&self, device_id: &str) -> Option<ConnectionSender> {
        self.inner.get(device_id).map(|entry| entry.value().clone())
    }

    /// True iff the device is registered and its connection is still open.
    pub fn is_live(&self, device_id: &str) -> bool {
        self.inner
            .get(device_id)
            .map(|entry| !entry.value().is_closed())
            .unwrap_or(false)
    }

    /// Number of registered connections.
    pub fn count(&self) -> usize {
        self.inner.len()
    }

    /// Snapshot of all registered device identities. Order insignificant.
    pub fn device_ids(&self) -> Vec<String> {
        self.inner.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Snapshot of all registered connections. Taken before iteration so the
    /// dispatch path never mutates the map while holding shard locks.
    pub fn snapshot(&self) -> Vec<(String, ConnectionSender)> {
        self.inner
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::ws::Message;
    use tokio::sync::mpsc;

    fn connection() -> (ConnectionSender, mpsc::UnboundedReceiver<Message>) {
        mpsc::unbounded_channel()
    }

    #[test]
    fn register_and_lookup() {
        let registry = DeviceRegistry::new();
        let (tx, _rx) = connection();

        registry.register("dev-1", tx);

        assert!(registry.get("dev-1").is_some());
        assert!(registry.is_live("dev-1"));
        assert_eq!(registry.count(), 1);
        assert_eq!(registry.device_ids(), vec!["dev-1".to_string()]);
    }

    #[test]
    fn register_evicts_prior_connection() {
        let registry = DeviceRegistry::new();
        let (old_tx, mut old_rx) = connection();
        let (new_tx, _new_rx) = connection();

        registry.register("dev-1", old_tx);
        registry.register("dev-1", new_tx);

        // Exactly one entry remains and the prior holder got a close frame.
        assert_eq!(registry.count(), 1);
        match old_rx.try_recv() {
            Ok(Message::Close(Some(frame))) => {
                assert_eq!(frame.code, CLOSE_SUPERSEDED);
            }
            other => panic!("Expected close frame for evicted connection, got {:?}", other),
        }
    }

    #[test]
    fn remove_is_idempotent() {
        let registry = DeviceRegistry::new();
        let (tx, _rx) = connection();

        registry.register("dev-1", tx);
        registry.remove("dev-1");
        registry.remove("dev-1");
        registry.remove("never-registered");

        assert_eq!(registry.count(), 0);
        assert!(!registry.is_live("dev-1"));
    }

    #[test]
    fn remove_if_current_spares_replacement() {
        let registry = DeviceRegistry::new();
        let (old_tx, _old_rx) = connection();
        let (new_tx, _new_rx) = connection();

        registry.register("dev-1", old_tx.clone());
        registry.register("dev-1", new_tx.clone());

        // Stale connection's cleanup must not unregister the replacement.
        registry.remove_if_current("dev-1", &old_tx);
        assert!(registry.is_live("dev-1"));

        registry.remove_if_current("dev-1", &new_tx);
        assert!(!registry.is_live("dev-1"));
    }

    #[test]
    fn closed_connection_is_not_live() {
        let registry = DeviceRegistry::new();
        let (tx, rx) = connection();

        registry.register("dev-1", tx);
        drop(rx);

        // Still registered, but no longer live.
        assert_eq!(registry.count(), 1);
        assert!(!registry.is_live("dev-1"));
    }
}
