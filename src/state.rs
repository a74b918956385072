use std::sync::Arc;

use crate::consumer::ConsumerService;
use crate::dispatch::Dispatcher;
use crate::queue::memory::MemoryBroker;
use crate::ws::DeviceRegistry;

/// Shared application state passed to all handlers via axum State extractor.
/// All components are explicitly constructed at process start and wired
/// together here; there are no process-wide singletons.
#[derive(Clone)]
pub struct AppState {
    /// Active WebSocket connections, one per device identity.
    pub registry: DeviceRegistry,
    /// Outbound dispatch engine over the registry.
    pub dispatcher: Dispatcher,
    /// Queue consumer, for the stats surface.
    pub consumer: Arc<ConsumerService>,
    /// In-process broker backing the embedded publish endpoint.
    pub broker: MemoryBroker,
}
