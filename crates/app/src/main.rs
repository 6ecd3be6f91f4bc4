//! Storefront backend entry point.
//!
//! Wires configuration, the Postgres pool, repositories, services, the
//! Kafka event publisher and job worker, and the HTTP API, then runs until
//! Ctrl+C or SIGTERM.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use app_config::AppConfig;
use cache::CatalogCache;
use kafka_consumer::{EventConsumer, JobDispatcher, LogMailer, WelcomeEmailJob};
use kafka_producer::KafkaEventPublisher;
use repository::{
    PgAuditRepository, PgCategoriesRepository, PgOrdersRepository, PgPaymentsRepository,
    PgProductsRepository, PgTokensRepository, PgUsersRepository, PgWishlistRepository,
};
use server::{AppInfo, AppState, Metrics, Server};
use service::{
    AuditLogger, AuthService, CategoryService, EventPublisher, NullPublisher, OrderService,
    OrderServiceImpl, PayTrClient, PayTrSigner, PaymentService, ProductService, WishlistService,
};

/// Initialize the tracing subscriber. `RUST_LOG` overrides the default `info` level.
fn init_logger() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Kafka publisher when enabled and reachable, otherwise events are dropped.
fn event_publisher(config: &AppConfig) -> Arc<dyn EventPublisher> {
    if !config.kafka_enabled {
        info!("Kafka disabled, domain events will not be published");
        return Arc::new(NullPublisher);
    }
    match KafkaEventPublisher::new(config) {
        Ok(publisher) => Arc::new(publisher),
        Err(err) => {
            error!(error = %err, "Failed to initialize Kafka producer, events will not be published");
            Arc::new(NullPublisher)
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logger();
    info!("Storefront backend starting...");

    let config = AppConfig::load().context("Failed to load configuration")?;

    let pool = db::init_db_pool(&config)
        .await
        .context("Failed to initialize database")?;
    info!("Database initialized successfully");

    let users = Arc::new(PgUsersRepository::new(pool.clone()));
    let tokens = Arc::new(PgTokensRepository::new(pool.clone()));
    let categories_repo = Arc::new(PgCategoriesRepository::new(pool.clone()));
    let products_repo = Arc::new(PgProductsRepository::new(pool.clone()));
    let orders_repo = Arc::new(PgOrdersRepository::new(pool.clone()));
    let payments_repo = Arc::new(PgPaymentsRepository::new(pool.clone()));
    let wishlist_repo = Arc::new(PgWishlistRepository::new(pool.clone()));
    let audit = AuditLogger::new(Arc::new(PgAuditRepository::new(pool.clone())));

    let cache = CatalogCache::new(config.cache_ttl);
    let events = event_publisher(&config);
    let paytr = config.paytr();
    let gateway = Arc::new(PayTrClient::new(&paytr).context("Failed to build PayTR client")?);

    let orders: Arc<dyn OrderService> = Arc::new(OrderServiceImpl::new(
        orders_repo,
        products_repo.clone(),
        cache.clone(),
        audit.clone(),
        events.clone(),
        config.shop(),
    ));
    let state = AppState {
        auth: Arc::new(AuthService::new(users, tokens, audit.clone(), events.clone())),
        products: Arc::new(ProductService::new(
            products_repo.clone(),
            categories_repo.clone(),
            cache.clone(),
            audit.clone(),
            events.clone(),
        )),
        categories: Arc::new(CategoryService::new(categories_repo, cache.clone())),
        payments: Arc::new(PaymentService::new(
            payments_repo,
            orders.clone(),
            gateway,
            PayTrSigner::new(&paytr),
            audit,
            events,
        )),
        wishlist: Arc::new(WishlistService::new(wishlist_repo, products_repo)),
        orders,
        cache: cache.clone(),
        database: Arc::new(pool),
        metrics: Arc::new(Metrics::new()),
        info: Arc::new(AppInfo::new(
            config.app_name.clone(),
            config.app_env.clone(),
            config.app_debug,
            config.app_url.clone(),
        )),
    };

    let shutdown = Arc::new(Notify::new());
    let mut tasks = JoinSet::new();

    if config.kafka_enabled {
        let job = WelcomeEmailJob::from_config(Arc::new(LogMailer), &config);
        let dispatcher = Arc::new(JobDispatcher::new(job));
        match EventConsumer::new(
            &config.kafka_brokers,
            &config.kafka_events_topic,
            &config.kafka_group_id,
            dispatcher,
        ) {
            Ok(consumer) => {
                let kafka_shutdown = shutdown.clone();
                tasks.spawn(async move {
                    info!("Starting Kafka job worker");
                    if let Err(err) = consumer.run(kafka_shutdown).await {
                        error!(error = %err, "Kafka consumer error");
                    }
                });
            }
            Err(err) => error!(error = %err, "Failed to initialize Kafka consumer"),
        }
    }

    let purge_shutdown = shutdown.clone();
    let purge_every = config.cache_ttl.max(Duration::from_secs(1));
    tasks.spawn(async move {
        let mut ticker = tokio::time::interval(purge_every);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let purged = cache.purge_expired().await;
                    if purged > 0 {
                        info!(purged, "Purged expired catalog cache entries");
                    }
                }
                _ = purge_shutdown.notified() => break,
            }
        }
    });

    let http_server = Server::new(config.http_port, state);
    let server_shutdown = shutdown.clone();
    let server_task = tokio::spawn(async move { http_server.start(server_shutdown).await });

    // The server stops on its own when a signal arrives; the rest follow it.
    match server_task.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => error!(error = %err, "HTTP server error"),
        Err(err) => error!(error = %err, "HTTP server task failed"),
    }
    shutdown.notify_waiters();

    let drain = async {
        while let Some(res) = tasks.join_next().await {
            if let Err(err) = res {
                error!(error = %err, "Task error");
            }
        }
    };
    if tokio::time::timeout(config.shutdown_timeout, drain).await.is_err() {
        warn!("Background tasks did not stop in time, aborting");
        tasks.abort_all();
    }

    info!("Application stopped");
    Ok(())
}
