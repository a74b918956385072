mod config;
mod consumer;
mod dispatch;
mod queue;
mod routes;
mod state;
mod ws;

use std::sync::Arc;
use tokio::net::TcpListener;

use config::{generate_config_template, Config};
use consumer::{ConsumerService, QueueNames};
use dispatch::Dispatcher;
use queue::memory::MemoryBroker;
use ws::DeviceRegistry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    if config.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "beacon_server=info".parse().unwrap()),
            )
            .init();
    } else {
        tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "beacon_server=info".parse().unwrap()),
            )
            .init();
    }

    tracing::info!("Beacon notification bridge v{} starting", env!("CARGO_PKG_VERSION"));

    // In-process broker with both notification queues declared.
    let broker = MemoryBroker::new([
        config.queue.single_queue.as_str(),
        config.queue.bulk_queue.as_str(),
    ]);

    // Connection registry and dispatch engine.
    let registry = DeviceRegistry::new();
    let dispatcher = Dispatcher::new(registry.clone());

    // Queue consumer. A bootstrap failure here aborts startup.
    let consumer = Arc::new(ConsumerService::new(
        Arc::new(broker.clone()),
        dispatcher.clone(),
        QueueNames {
            single: config.queue.single_queue.clone(),
            bulk: config.queue.bulk_queue.clone(),
        },
        config.queue.prefetch,
    ));
    consumer.start().await?;

    // Build application state and router.
    let app_state = state::AppState {
        registry,
        dispatcher,
        consumer: Arc::clone(&consumer),
        broker,
    };
    let app = routes::build_router(app_state);

    // Bind and serve.
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);
    tracing::info!("Health: http://{}/health", addr);
    tracing::info!("WebSocket: ws://{}/ws", addr);

    // Graceful shutdown on ctrl-c: stop the consumer, then exit.
    let shutdown_consumer = Arc::clone(&consumer);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received, stopping consumer");
            shutdown_consumer.stop().await;
        })
        .await?;

    Ok(())
}
