use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::ServeArgs;
use crate::error::ServerError;
use omnilog_api::{LOG_CREATED, LogService};
use omnilog_engine::{
    AppConfig, BrokerClient, Consumer, ConsumerOptions, DefaultWorker, FailurePolicy,
    LogCreatedWorker, RoutingTable, TcpLineBroker,
};
use omnilog_store::{DefaultLogService, MemoryLogRepository};

pub async fn run(args: ServeArgs) -> Result<(), ServerError> {
    tracing::info!("omnilog-server starting");

    // --- Load config ---
    let config = AppConfig::load(&args.config)?;
    tracing::info!(config = %args.config, service = %config.service.name, "loaded config");

    // --- CancellationToken for graceful shutdown ---
    let token = CancellationToken::new();

    // --- Persistence port ---
    let repo = Arc::new(MemoryLogRepository::new(config.store.max_records));
    let service: Arc<dyn LogService> = Arc::new(DefaultLogService::new(repo.clone()));
    tracing::info!(max_records = config.store.max_records, "log store ready");

    // --- Routing table ---
    let routes = RoutingTable::builder(Arc::new(DefaultWorker::new()))
        .route(LOG_CREATED, Arc::new(LogCreatedWorker::new(service)))
        .build()?;

    // --- Consumer ---
    let failure_policy = FailurePolicy::from_config(&config.consumer).await?;
    let broker: Arc<dyn BrokerClient> = Arc::new(TcpLineBroker::new(config.broker.listen.clone()));
    let mut consumer = Consumer::new(ConsumerOptions {
        config: config.consumer.clone(),
        broker,
        routes: Arc::new(routes),
        failure_policy,
    });
    consumer.start(&token).await?;

    tracing::info!("server ready");

    // --- Wait for Ctrl+C ---
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down...");

    token.cancel();

    // Drain in-flight handler calls, bounded by the shutdown timeout.
    let timeout = Duration::from_secs(args.shutdown_timeout_secs);
    match tokio::time::timeout(timeout, consumer.shutdown()).await {
        Ok(_) => {}
        Err(_) => tracing::warn!(
            timeout_secs = args.shutdown_timeout_secs,
            "consumer did not stop in time"
        ),
    }

    tracing::info!(stored = repo.len().await, "shutdown complete");
    Ok(())
}
