//! Queue consumer service.
//!
//! Owns the broker subscriptions for the single-target and bulk queues,
//! decodes each delivery, runs the matching job processor, and settles the
//! delivery with a terminal ack or nack. Decode failures and processor
//! panics are isolated to the delivery that caused them: the message is
//! nacked without requeue and the loop moves on.

pub mod jobs;

use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

use crate::dispatch::Dispatcher;
use crate::queue::{Delivery, DeliveryStream, QueueChannel, QueueConnection, QueueError, QueueTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error("transport bootstrap failed: {0}")]
    Bootstrap(#[from] QueueError),
    #[error("consumer is already running")]
    AlreadyRunning,
}

/// Queue names the consumer subscribes to.
#[derive(Debug, Clone)]
pub struct QueueNames {
    pub single: String,
    pub bulk: String,
}

#[derive(Debug, Clone, Copy)]
enum QueueKind {
    Single,
    Bulk,
}

/// Process-lifetime counters exposed on the stats surface.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerStats {
    pub processed_messages: u64,
    pub failed_messages: u64,
    pub uptime: u64,
    pub start_time: String,
}

pub struct ConsumerService {
    transport: Arc<dyn QueueTransport>,
    dispatcher: Dispatcher,
    queues: QueueNames,
    prefetch: u16,
    state: Mutex<ConsumerState>,
    connection: tokio::sync::Mutex<Option<Box<dyn QueueConnection>>>,
    channel: tokio::sync::Mutex<Option<Arc<dyn QueueChannel>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    processed: AtomicU64,
    failed: AtomicU64,
    started_at: chrono::DateTime<chrono::Utc>,
}

impl ConsumerService {
    pub fn new(
        transport: Arc<dyn QueueTransport>,
        dispatcher: Dispatcher,
        queues: QueueNames,
        prefetch: u16,
    ) -> Self {
        Self {
            transport,
            dispatcher,
            queues,
            prefetch,
            state: Mutex::new(ConsumerState::Stopped),
            connection: tokio::sync::Mutex::new(None),
            channel: tokio::sync::Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            started_at: chrono::Utc::now(),
        }
    }

    pub fn state(&self) -> ConsumerState {
        *self.state.lock().expect("state lock")
    }

    /// Connect to the broker, open a channel with prefetch=1 semantics, and
    /// begin consuming both queues. Any failure here is fatal to startup:
    /// the consumer returns to `Stopped` and the error propagates.
    pub async fn start(self: &Arc<Self>) -> Result<(), ConsumerError> {
        {
            let mut state = self.state.lock().expect("state lock");
            if *state != ConsumerState::Stopped {
                return Err(ConsumerError::AlreadyRunning);
            }
            *state = ConsumerState::Starting;
        }

        match self.bootstrap().await {
            Ok(()) => {
                *self.state.lock().expect("state lock") = ConsumerState::Running;
                tracing::info!(
                    single_queue = %self.queues.single,
                    bulk_queue = %self.queues.bulk,
                    "Consumer running"
                );
                Ok(())
            }
            Err(e) => {
                *self.state.lock().expect("state lock") = ConsumerState::Stopped;
                tracing::error!(error = %e, "Consumer bootstrap failed");
                Err(e.into())
            }
        }
    }

    async fn bootstrap(self: &Arc<Self>) -> Result<(), QueueError> {
        let connection = self.transport.connect().await?;
        let channel: Arc<dyn QueueChannel> = Arc::from(connection.open_channel().await?);

        channel.set_prefetch(self.prefetch).await?;

        let single = channel.consume(&self.queues.single).await?;
        let bulk = channel.consume(&self.queues.bulk).await?;

        let mut tasks = self.tasks.lock().expect("tasks lock");
        tasks.push(tokio::spawn(Arc::clone(self).run_queue_loop(
            Arc::clone(&channel),
            single,
            QueueKind::Single,
        )));
        tasks.push(tokio::spawn(Arc::clone(self).run_queue_loop(
            Arc::clone(&channel),
            bulk,
            QueueKind::Bulk,
        )));
        drop(tasks);

        *self.connection.lock().await = Some(connection);
        *self.channel.lock().await = Some(channel);
        Ok(())
    }

    async fn run_queue_loop(
        self: Arc<Self>,
        channel: Arc<dyn QueueChannel>,
        mut deliveries: DeliveryStream,
        kind: QueueKind,
    ) {
        // One delivery at a time: the next message is not taken off the
        // stream until the previous one is terminally acknowledged.
        while let Some(delivery) = deliveries.recv().await {
            self.handle_delivery(channel.as_ref(), kind, delivery).await;
        }
    }

    async fn handle_delivery(&self, channel: &dyn QueueChannel, kind: QueueKind, delivery: Delivery) {
        let tag = delivery.tag;

        match self.process(kind, &delivery.body) {
            Ok(job_id) => {
                if let Err(e) = channel.ack(tag).await {
                    tracing::warn!(tag = tag, error = %e, "Ack failed");
                }
                self.processed.fetch_add(1, Ordering::Relaxed);
                tracing::info!(tag = tag, job_id = ?job_id, "Job processed");
            }
            Err(reason) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(tag = tag, reason = %reason, "Job failed, discarding");
                // No requeue: a malformed or poisoned job will not get
                // better on redelivery.
                if let Err(e) = channel.nack(tag, false).await {
                    tracing::warn!(tag = tag, error = %e, "Nack failed");
                }
            }
        }
    }

    /// Decode and run one job. A processor panic is caught and treated like
    /// any other processing failure so the delivery still reaches a
    /// terminal acknowledgment.
    fn process(&self, kind: QueueKind, body: &[u8]) -> Result<Option<String>, String> {
        match kind {
            QueueKind::Single => {
                let job: jobs::SingleJob =
                    serde_json::from_slice(body).map_err(|e| format!("decode error: {e}"))?;
                let job_id = job.id.clone();
                std::panic::catch_unwind(AssertUnwindSafe(|| {
                    jobs::process_single(&self.dispatcher, &job)
                }))
                .map_err(|_| "processor panicked".to_string())?;
                Ok(job_id)
            }
            QueueKind::Bulk => {
                let job: jobs::BulkJob =
                    serde_json::from_slice(body).map_err(|e| format!("decode error: {e}"))?;
                let job_id = job.id.clone();
                std::panic::catch_unwind(AssertUnwindSafe(|| {
                    jobs::process_bulk(&self.dispatcher, &job)
                }))
                .map_err(|_| "processor panicked".to_string())?;
                Ok(job_id)
            }
        }
    }

    /// Best-effort shutdown: stop the queue loops and close the channel and
    /// connection. Teardown errors are logged and swallowed; the consumer
    /// always ends up `Stopped`.
    pub async fn stop(&self) {
        {
            let mut state = self.state.lock().expect("state lock");
            if *state == ConsumerState::Stopped {
                return;
            }
            *state = ConsumerState::Stopping;
        }

        for task in self.tasks.lock().expect("tasks lock").drain(..) {
            task.abort();
        }

        if let Some(channel) = self.channel.lock().await.take() {
            if let Err(e) = channel.close().await {
                tracing::warn!(error = %e, "Error closing queue channel");
            }
        }
        if let Some(connection) = self.connection.lock().await.take() {
            if let Err(e) = connection.close().await {
                tracing::warn!(error = %e, "Error closing queue connection");
            }
        }

        *self.state.lock().expect("state lock") = ConsumerState::Stopped;
        tracing::info!("Consumer stopped");
    }

    pub fn stats(&self) -> ConsumerStats {
        let uptime = (chrono::Utc::now() - self.started_at).num_seconds().max(0) as u64;
        ConsumerStats {
            processed_messages: self.processed.load(Ordering::Relaxed),
            failed_messages: self.failed.load(Ordering::Relaxed),
            uptime,
            start_time: self.started_at.to_rfc3339(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::memory::{AckKind, MemoryBroker};
    use crate::ws::DeviceRegistry;
    use std::time::Duration;

    fn service(broker: &MemoryBroker) -> (Arc<ConsumerService>, DeviceRegistry) {
        let registry = DeviceRegistry::new();
        let dispatcher = Dispatcher::new(registry.clone());
        let consumer = Arc::new(ConsumerService::new(
            Arc::new(broker.clone()),
            dispatcher,
            QueueNames {
                single: "notifications.send".to_string(),
                bulk: "notifications.bulk".to_string(),
            },
            1,
        ));
        (consumer, registry)
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        for _ in 0..100 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached within timeout");
    }

    #[tokio::test]
    async fn start_twice_is_an_error() {
        let broker = MemoryBroker::new(["notifications.send", "notifications.bulk"]);
        let (consumer, _registry) = service(&broker);

        consumer.start().await.unwrap();
        assert_eq!(consumer.state(), ConsumerState::Running);
        assert!(matches!(
            consumer.start().await,
            Err(ConsumerError::AlreadyRunning)
        ));

        consumer.stop().await;
        assert_eq!(consumer.state(), ConsumerState::Stopped);
    }

    #[tokio::test]
    async fn bootstrap_failure_is_fatal_and_resets_state() {
        // Broker without the expected queues: consume fails at startup.
        let broker = MemoryBroker::new(Vec::<String>::new());
        let (consumer, _registry) = service(&broker);

        assert!(matches!(
            consumer.start().await,
            Err(ConsumerError::Bootstrap(_))
        ));
        assert_eq!(consumer.state(), ConsumerState::Stopped);
    }

    #[tokio::test]
    async fn malformed_job_is_nacked_without_requeue() {
        let broker = MemoryBroker::new(["notifications.send", "notifications.bulk"]);
        let (consumer, _registry) = service(&broker);
        consumer.start().await.unwrap();

        broker
            .publish("notifications.send", b"{not json".to_vec())
            .unwrap();

        let stats_consumer = Arc::clone(&consumer);
        wait_for(move || stats_consumer.stats().failed_messages == 1).await;

        let stats = consumer.stats();
        assert_eq!(stats.failed_messages, 1);
        assert_eq!(stats.processed_messages, 0);

        let history = broker.ack_history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].kind, AckKind::Nack { requeue: false });

        consumer.stop().await;
    }

    #[tokio::test]
    async fn offline_target_still_counts_as_processed() {
        let broker = MemoryBroker::new(["notifications.send", "notifications.bulk"]);
        let (consumer, _registry) = service(&broker);
        consumer.start().await.unwrap();

        broker
            .publish(
                "notifications.send",
                br#"{"targetDevice":"ghost","title":"Hi","message":"Hello"}"#.to_vec(),
            )
            .unwrap();

        let stats_consumer = Arc::clone(&consumer);
        wait_for(move || stats_consumer.stats().processed_messages == 1).await;

        let history = broker.ack_history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].kind, AckKind::Ack);

        consumer.stop().await;
    }

    #[tokio::test]
    async fn bulk_job_acked_even_when_all_devices_offline() {
        let broker = MemoryBroker::new(["notifications.send", "notifications.bulk"]);
        let (consumer, _registry) = service(&broker);
        consumer.start().await.unwrap();

        broker
            .publish(
                "notifications.bulk",
                br#"{"targetDevices":["a","b","c"],"title":"t","message":"m"}"#.to_vec(),
            )
            .unwrap();

        let stats_consumer = Arc::clone(&consumer);
        wait_for(move || stats_consumer.stats().processed_messages == 1).await;

        assert_eq!(broker.ack_history()[0].kind, AckKind::Ack);
        consumer.stop().await;
    }
}
