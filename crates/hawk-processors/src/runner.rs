//! Process wiring shared by the processor binaries.

use std::sync::Arc;

use anyhow::anyhow;
use hawk_broker::{AmqpConnector, ConnectionManager, Connector, QueueConsumer, QueuePublisher};
use hawk_core::{Logger, WorkerConfig};
use hawk_worker::{TaskHandler, Worker};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Load configuration, initialise tracing and run the handler built by
/// `build` until the process is asked to stop. An error means the worker gave
/// up on the broker.
pub async fn run_processor<H, F>(
    service: &'static str,
    default_source: &str,
    default_target: &str,
    build: F,
) -> anyhow::Result<()>
where
    H: TaskHandler + 'static,
    F: FnOnce(&WorkerConfig) -> H,
{
    let config = WorkerConfig::from_env(default_source, default_target)?;
    hawk_infra::init_telemetry(config.log_format, service, &config.environment)
        .map_err(|e| anyhow!("Failed to initialize tracing: {}", e))?;

    tracing::info!(
        registry = %config.redacted_registry_url(),
        source = %config.source_queue,
        target = %config.target_queue,
        prefetch = config.consumer_prefetch,
        production = config.is_production(),
        "Starting {}",
        service
    );

    let handler: Arc<dyn TaskHandler> = Arc::new(build(&config));
    let connector: Arc<dyn Connector> = Arc::new(AmqpConnector::new(config.registry_url.clone()));
    let shutdown = CancellationToken::new();
    let watcher = hawk_infra::cancel_on_shutdown(shutdown.clone());

    let result = run_with_connector(service, &config, connector, handler, shutdown.clone()).await;

    shutdown.cancel();
    join_watcher(watcher).await;
    result
}

async fn join_watcher(watcher: JoinHandle<()>) {
    if let Err(e) = watcher.await {
        tracing::debug!(error = %e, "Shutdown signal watcher ended abnormally");
    }
}

/// Build consumer, publisher and worker on `connector` and run until
/// `shutdown` fires or the consumer gives up.
pub async fn run_with_connector(
    service: &str,
    config: &WorkerConfig,
    connector: Arc<dyn Connector>,
    handler: Arc<dyn TaskHandler>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let logger = Logger::root(service, &config.source_queue);

    let (consumer, deliveries) = QueueConsumer::new(
        ConnectionManager::new("consumer", Arc::clone(&connector)),
        config.source_queue.clone(),
        logger.component("consumer"),
    );
    let consumer = consumer.with_prefetch(config.consumer_prefetch);

    let publisher = QueuePublisher::new(
        ConnectionManager::new("publisher", connector),
        config.target_queue.clone(),
        logger.component("publisher"),
    );

    let worker = Worker::new(consumer, deliveries, publisher, handler, logger);
    worker
        .run(shutdown)
        .await
        .map_err(|e| anyhow!(e.detailed_message()))
}
