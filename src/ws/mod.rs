pub mod actor;
pub mod handler;
pub mod protocol;
pub mod registry;

use tokio::sync::mpsc;

pub use registry::DeviceRegistry;

/// Type alias for the sender half of a WebSocket connection's channel.
/// Other parts of the system can clone this to push messages to a specific device.
pub type ConnectionSender = mpsc::UnboundedSender<axum::extract::ws::Message>;
