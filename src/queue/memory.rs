//! In-process queue broker.
//!
//! Named queues over tokio channels with manual ack/nack, standing in for
//! an external broker in embedded mode and in tests. Messages published
//! before a consumer attaches are buffered. Unacknowledged deliveries are
//! tracked so a nack with requeue puts the body back on its queue.

use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use async_trait::async_trait;

use super::{Delivery, DeliveryStream, QueueChannel, QueueConnection, QueueError, QueueTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckKind {
    Ack,
    Nack { requeue: bool },
}

/// Terminal acknowledgment recorded for one delivery tag.
#[derive(Debug, Clone, Copy)]
pub struct AckRecord {
    pub tag: u64,
    pub kind: AckKind,
}

struct QueueSlot {
    sender: mpsc::UnboundedSender<Delivery>,
    receiver: Mutex<Option<DeliveryStream>>,
}

struct PendingDelivery {
    queue: String,
    body: Vec<u8>,
}

struct BrokerInner {
    queues: DashMap<String, QueueSlot>,
    pending: DashMap<u64, PendingDelivery>,
    next_tag: AtomicU64,
    history: Mutex<Vec<AckRecord>>,
}

/// In-process broker. Cheap to clone; all clones share state.
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<BrokerInner>,
}

impl MemoryBroker {
    /// Create a broker with the given queues declared.
    pub fn new<I, S>(queues: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let broker = Self {
            inner: Arc::new(BrokerInner {
                queues: DashMap::new(),
                pending: DashMap::new(),
                next_tag: AtomicU64::new(1),
                history: Mutex::new(Vec::new()),
            }),
        };
        for queue in queues {
            broker.declare_queue(queue.as_ref());
        }
        broker
    }

    pub fn declare_queue(&self, name: &str) {
        self.inner.queues.entry(name.to_string()).or_insert_with(|| {
            let (sender, receiver) = mpsc::unbounded_channel();
            QueueSlot {
                sender,
                receiver: Mutex::new(Some(receiver)),
            }
        });
    }

    pub fn has_queue(&self, name: &str) -> bool {
        self.inner.queues.contains_key(name)
    }

    /// Publish a raw message body onto a declared queue.
    pub fn publish(&self, queue: &str, body: Vec<u8>) -> Result<(), QueueError> {
        let slot = self
            .inner
            .queues
            .get(queue)
            .ok_or_else(|| QueueError::UnknownQueue(queue.to_string()))?;

        let tag = self.inner.next_tag.fetch_add(1, Ordering::Relaxed);
        self.inner.pending.insert(
            tag,
            PendingDelivery {
                queue: queue.to_string(),
                body: body.clone(),
            },
        );

        slot.sender
            .send(Delivery { tag, body })
            .map_err(|_| QueueError::ChannelClosed)
    }

    /// Terminal acknowledgments seen so far, in order.
    pub fn ack_history(&self) -> Vec<AckRecord> {
        self.inner.history.lock().expect("history lock").clone()
    }

    /// Number of deliveries not yet terminally acknowledged.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    fn settle(&self, tag: u64, kind: AckKind) -> Result<(), QueueError> {
        let pending = self.inner.pending.remove(&tag);

        self.inner
            .history
            .lock()
            .expect("history lock")
            .push(AckRecord { tag, kind });

        if let (Some((_, delivery)), AckKind::Nack { requeue: true }) = (pending, kind) {
            self.publish(&delivery.queue, delivery.body)?;
        }
        Ok(())
    }
}

#[async_trait]
impl QueueTransport for MemoryBroker {
    async fn connect(&self) -> Result<Box<dyn QueueConnection>, QueueError> {
        Ok(Box::new(MemoryConnection {
            broker: self.clone(),
        }))
    }
}

struct MemoryConnection {
    broker: MemoryBroker,
}

#[async_trait]
impl QueueConnection for MemoryConnection {
    async fn open_channel(&self) -> Result<Box<dyn QueueChannel>, QueueError> {
        Ok(Box::new(MemoryChannel {
            broker: self.broker.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    async fn close(&self) -> Result<(), QueueError> {
        Ok(())
    }
}

struct MemoryChannel {
    broker: MemoryBroker,
    closed: AtomicBool,
}

impl MemoryChannel {
    fn ensure_open(&self) -> Result<(), QueueError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QueueError::ChannelClosed);
        }
        Ok(())
    }
}

#[async_trait]
impl QueueChannel for MemoryChannel {
    async fn set_prefetch(&self, _count: u16) -> Result<(), QueueError> {
        // One-in-flight already holds: the consumer loop processes a
        // delivery to terminal ack before taking the next off the stream.
        self.ensure_open()
    }

    async fn consume(&self, queue: &str) -> Result<DeliveryStream, QueueError> {
        self.ensure_open()?;
        let slot = self
            .broker
            .inner
            .queues
            .get(queue)
            .ok_or_else(|| QueueError::UnknownQueue(queue.to_string()))?;

        let stream = slot
            .receiver
            .lock()
            .expect("receiver lock")
            .take()
            .ok_or_else(|| QueueError::ConsumerExists(queue.to_string()));
        stream
    }

    async fn ack(&self, tag: u64) -> Result<(), QueueError> {
        self.ensure_open()?;
        self.broker.settle(tag, AckKind::Ack)
    }

    async fn nack(&self, tag: u64, requeue: bool) -> Result<(), QueueError> {
        self.ensure_open()?;
        self.broker.settle(tag, AckKind::Nack { requeue })
    }

    async fn close(&self) -> Result<(), QueueError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
