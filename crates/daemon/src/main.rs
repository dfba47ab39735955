//! Leveler Daemon - Main Entry Point
//!
//! Wires the durable queue, the throttled consumer and the JSON-RPC producer
//! surface together, then runs until Ctrl+C.

mod settings;
mod telemetry;

use anyhow::{Context, Result};
use settings::{Settings, StoreLocation};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use leveler_api_rpc::{RpcServer, RpcServerConfig, RpcServices};
use leveler_core::application::{
    shutdown_channel, BatchConfig, Batcher, Broker, Consumer, ConsumerConfig, DirectProcessor,
    Pipeline, RecoveryService, RedeliveryPolicy, RoundRobinPool, TokenBucket,
};
use leveler_core::domain::QueueConfig;
use leveler_core::port::id_provider::UuidProvider;
use leveler_core::port::queue_store::memory::InMemoryQueueStore;
use leveler_core::port::time_provider::SystemTimeProvider;
use leveler_core::port::{Filter, QueueStore};
use leveler_infra_sqlite::{create_pool, run_migrations, SqliteQueueStore};
use leveler_infra_system::{
    ArtifactLocator, DocumentRenderer, FileTextExtractor, GlossaryTranslator, LatencyModel,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Configuration and logging
    let settings = Settings::from_env().context("Invalid configuration")?;
    let _log_guard = telemetry::init(&settings)?;

    info!("Leveler v{} starting...", VERSION);

    // 2. Queue store
    let store = open_store(&settings.store).await?;
    let time_provider = Arc::new(SystemTimeProvider);
    let id_provider = Arc::new(UuidProvider);

    // 3. Declare queues
    let broker = Broker::new(store.clone(), time_provider.clone());
    let queue_config = QueueConfig::new(&settings.queue)
        .with_max_length(settings.max_length)
        .with_message_ttl(settings.message_ttl);
    broker
        .assert_queue(&queue_config)
        .await
        .context("Queue declaration failed")?;

    let redelivery = match settings.max_deliveries {
        Some(max) => RedeliveryPolicy::dead_letter_for(&settings.queue, max),
        None => RedeliveryPolicy::Unlimited,
    };
    let mut queues = vec![settings.queue.clone()];
    if let Some(dead_letter) = redelivery.dead_letter_queue() {
        broker
            .assert_queue(&queue_config.renamed(dead_letter))
            .await
            .context("Dead-letter queue declaration failed")?;
        queues.push(dead_letter.to_string());
    }

    // 4. Crash recovery: unacked messages from a previous run go back to ready
    info!("Running startup recovery...");
    let queue_refs: Vec<&str> = queues.iter().map(String::as_str).collect();
    match RecoveryService::new(store.clone()).recover_queues(&queue_refs).await {
        Ok(report) => info!(
            requeued = report.requeued,
            dropped = report.dropped_transient,
            "Startup recovery completed"
        ),
        Err(e) => error!(error = %e, "Startup recovery failed"),
    }

    // 5. Pipeline: extract -> translate -> render
    let locator = ArtifactLocator::new(&settings.output_dir);
    let pipeline = Arc::new(build_pipeline(&settings, &locator)?);
    info!(stages = ?pipeline.stages(), fanout = settings.fanout, "Pipeline ready");

    // 6. Admission control and consumer
    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let bucket = Arc::new(TokenBucket::new(settings.refill_rate, settings.burst));
    let refill_handle = bucket.spawn_refill(settings.refill_period, shutdown_rx.clone());

    let mut consumer_config = ConsumerConfig::new(&settings.queue)
        .with_prefetch(settings.prefetch)
        .with_redelivery(redelivery);
    if let Some(job_timeout) = settings.job_timeout {
        consumer_config = consumer_config.with_job_timeout(job_timeout);
    }
    let grace = consumer_config.shutdown_grace;
    let consumer = Consumer::new(
        broker.clone(),
        bucket.clone(),
        pipeline.clone(),
        consumer_config,
    );
    let consumer_stats = consumer.stats();
    let consumer_handle = tokio::spawn(async move {
        if let Err(e) = consumer.run(shutdown_rx).await {
            error!(error = %e, "Consumer failed");
        }
    });

    // 7. Producer surface
    let batcher = Batcher::new(
        broker.clone(),
        BatchConfig::new(&settings.queue),
        id_provider.clone(),
        time_provider.clone(),
    )?;
    let direct = DirectProcessor::new(
        pipeline,
        settings.direct_max_concurrent,
        id_provider,
        time_provider,
    );

    let rpc_server = RpcServer::new(
        RpcServerConfig {
            port: settings.port,
            ..Default::default()
        },
        RpcServices {
            queue: settings.queue.clone(),
            broker,
            batcher: Arc::new(batcher),
            direct: Arc::new(direct),
            admission: bucket,
            consumer_stats,
            artifacts: Arc::new(locator),
            upload_rate_per_min: settings.upload_rate_per_min,
        },
    );
    let (addr, rpc_handle) = rpc_server
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("RPC server start failed: {}", e))?;

    info!(addr = %addr, queue = %settings.queue, "System ready. Press Ctrl+C to shutdown");

    // 8. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting gracefully...");

    shutdown_tx.shutdown();
    rpc_handle
        .stop()
        .map_err(|e| anyhow::anyhow!("RPC server stop failed: {}", e))?;
    if tokio::time::timeout(grace + Duration::from_secs(1), consumer_handle)
        .await
        .is_err()
    {
        error!("Consumer did not stop within the shutdown grace period");
    }
    let _ = refill_handle.await;

    info!("Shutdown complete.");
    Ok(())
}

async fn open_store(location: &StoreLocation) -> Result<Arc<dyn QueueStore>> {
    Ok(match location {
        StoreLocation::Memory => {
            info!("Using in-memory queue store (messages are lost on exit)");
            Arc::new(InMemoryQueueStore::new())
        }
        StoreLocation::Sqlite(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            info!(db_path = %path.display(), "Initializing database...");

            let pool = create_pool(&format!("sqlite://{}", path.display()))
                .await
                .map_err(|e| anyhow::anyhow!("DB pool creation failed: {}", e))?;
            run_migrations(&pool)
                .await
                .map_err(|e| anyhow::anyhow!("Migration failed: {}", e))?;
            Arc::new(SqliteQueueStore::new(pool))
        }
    })
}

fn build_pipeline(settings: &Settings, locator: &ArtifactLocator) -> Result<Pipeline> {
    let extract: Arc<dyn Filter> = if settings.fanout > 1 {
        let instances: Vec<Arc<dyn Filter>> = (0..settings.fanout)
            .map(|id| {
                Arc::new(FileTextExtractor::new(id, LatencyModel::extract_default()))
                    as Arc<dyn Filter>
            })
            .collect();
        Arc::new(RoundRobinPool::new(instances)?)
    } else {
        Arc::new(FileTextExtractor::new(0, LatencyModel::extract_default()))
    };

    Ok(Pipeline::builder()
        .filter(extract)
        .filter(Arc::new(GlossaryTranslator::default()))
        .filter(Arc::new(DocumentRenderer::new(locator.clone())))
        .build()?)
}
