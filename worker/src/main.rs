//! Orderdesk worker.
//!
//! Consumes the `products` and `orders` queues and applies them to Postgres,
//! keeping the Redis product cache coherent. Messages that cannot be applied
//! land in the `failed_messages` table.

mod config;

use anyhow::Context;
use config::Config;
use orderdesk_core::{CacheBackend, DeadLetterSink, MessageBus};
use orderdesk_postgres::PgStore;
use orderdesk_redis::RedisCache;
use orderdesk_redpanda::RedpandaMessageBus;
use orderdesk_runtime::{
    Cached, MessageProcessor, MetricsServer, OrderMessageHandler, ProductMessageHandler,
    QueueConsumer,
};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "orderdesk=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Orderdesk worker");

    let config = Config::from_env();
    info!(
        redpanda_brokers = %config.redpanda.brokers,
        consumer_group = %config.redpanda.consumer_group,
        cache_enabled = config.cache.enabled,
        "Configuration loaded"
    );

    let metrics_addr = config
        .server
        .metrics_addr()
        .context("Invalid METRICS_HOST/METRICS_PORT")?;
    let mut metrics = MetricsServer::new(metrics_addr);
    metrics.start().context("Failed to start metrics server")?;

    info!("Connecting to Postgres...");
    let store = PgStore::connect(
        &config.postgres.url,
        config.postgres.max_connections,
        config.postgres.acquire_timeout(),
    )
    .await
    .context("Failed to connect to Postgres")?;
    store.migrate().await.context("Failed to run migrations")?;
    info!("Postgres ready");

    let cache = connect_cache(&config).await;

    let bus: Arc<dyn MessageBus> = Arc::new(
        RedpandaMessageBus::builder()
            .brokers(&config.redpanda.brokers)
            .consumer_group(&config.redpanda.consumer_group)
            .auto_offset_reset(&config.redpanda.auto_offset_reset)
            .timeout(config.redpanda.send_timeout())
            .build()
            .context("Failed to create Redpanda bus")?,
    );
    let dead_letters: Arc<dyn DeadLetterSink> = Arc::new(store.dead_letters());

    let products = Cached::new(store.products(), cache).with_ttl(config.cache.ttls().product);
    let retry = config.retry.policy();

    let product_processor = Arc::new(
        MessageProcessor::new(
            ProductMessageHandler::new(products.clone()),
            Arc::clone(&dead_letters),
        )
        .with_retry_policy(retry.clone()),
    );
    let order_processor = Arc::new(
        MessageProcessor::new(
            OrderMessageHandler::new(products, store.orders()),
            Arc::clone(&dead_letters),
        )
        .with_retry_policy(retry),
    );

    let (shutdown_tx, _) = broadcast::channel(1);
    let product_consumer = QueueConsumer::new(
        "products",
        &config.redpanda.products_queue,
        Arc::clone(&bus),
        product_processor,
        shutdown_tx.subscribe(),
    )
    .with_retry_delay(config.retry.reconnect_delay())
    .spawn();
    let order_consumer = QueueConsumer::new(
        "orders",
        &config.redpanda.orders_queue,
        bus,
        order_processor,
        shutdown_tx.subscribe(),
    )
    .with_retry_delay(config.retry.reconnect_delay())
    .spawn();
    info!("Queue consumers started");

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    let stopped = tokio::time::timeout(config.server.shutdown_timeout(), async {
        let (products, orders) = tokio::join!(product_consumer, order_consumer);
        for result in [products, orders] {
            if let Err(e) = result {
                error!(error = %e, "Consumer task panicked");
            }
        }
    })
    .await;

    if stopped.is_err() {
        warn!(
            timeout_secs = config.server.shutdown_timeout,
            "Consumers did not stop in time"
        );
    }

    info!("Worker stopped");
    Ok(())
}

/// Redis backend, or `None` when disabled or unreachable.
///
/// The cache is optional: the worker runs against Postgres alone rather
/// than refusing to start.
async fn connect_cache(config: &Config) -> Option<Arc<dyn CacheBackend>> {
    if !config.cache.enabled {
        info!("Cache disabled");
        return None;
    }

    match RedisCache::connect(&config.redis.url, config.redis.timeout()).await {
        Ok(cache) => Some(Arc::new(cache)),
        Err(e) => {
            warn!(error = %e, "Redis unavailable, running without cache");
            None
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}
