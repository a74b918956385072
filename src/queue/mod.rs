//! Queue transport seam.
//!
//! The broker itself is an external collaborator; this module pins down the
//! interface the consumer drives it through: connect, open a channel,
//! consume a named queue, and acknowledge deliveries manually. The bundled
//! [`memory::MemoryBroker`] implements the same interface in-process for
//! embedded mode and tests; an AMQP-backed implementation plugs in behind
//! the same traits.

pub mod memory;

use async_trait::async_trait;
use tokio::sync::mpsc;

/// One message taken off a queue. The tag is the handle for ack/nack.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub tag: u64,
    pub body: Vec<u8>,
}

/// Stream of deliveries for one consumer of one queue.
pub type DeliveryStream = mpsc::UnboundedReceiver<Delivery>;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue '{0}' is not declared")]
    UnknownQueue(String),
    #[error("queue '{0}' already has a consumer")]
    ConsumerExists(String),
    #[error("channel is closed")]
    ChannelClosed,
    #[error("transport connection failed: {0}")]
    Connect(String),
}

/// Entry point to a queue broker.
#[async_trait]
pub trait QueueTransport: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn QueueConnection>, QueueError>;
}

/// An established broker connection.
#[async_trait]
pub trait QueueConnection: Send + Sync {
    async fn open_channel(&self) -> Result<Box<dyn QueueChannel>, QueueError>;
    async fn close(&self) -> Result<(), QueueError>;
}

/// A channel with manual acknowledgment semantics.
#[async_trait]
pub trait QueueChannel: Send + Sync {
    /// Limit the number of unacknowledged deliveries in flight.
    async fn set_prefetch(&self, count: u16) -> Result<(), QueueError>;

    /// Begin consuming a named queue. At most one consumer per queue.
    async fn consume(&self, queue: &str) -> Result<DeliveryStream, QueueError>;

    /// Positively acknowledge a delivery.
    async fn ack(&self, tag: u64) -> Result<(), QueueError>;

    /// Negatively acknowledge a delivery, optionally requeueing it.
    async fn nack(&self, tag: u64, requeue: bool) -> Result<(), QueueError>;

    async fn close(&self) -> Result<(), QueueError>;
}
