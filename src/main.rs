//! Clubcast publish service.
//!
//! Main entry point. Initializes tracing, loads configuration, wires the
//! storage backend, starts the consumer engine and the HTTP ingress, and
//! coordinates graceful shutdown.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clubcast_api::{AppState, Config, StorageMode};
use clubcast_core::{
    idempotency::MemoryIdempotencyStore, queue::MemoryJobQueue, registry::MemoryTenantRegistry,
    storage::PostgresStorage, Clock, IdempotencyStore, JobQueue, RateLimiter, SystemClock,
    TenantRegistry,
};
use clubcast_delivery::{adapter, ConsumerContext, PublishEngine, Publisher, RelayAdapter};
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("starting Clubcast publish service");

    let config = Config::load()?;
    info!(
        storage_mode = ?config.storage_mode,
        server_addr = %format!("{}:{}", config.host, config.port),
        relay_url = %config.relay_url,
        "configuration loaded"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());

    // Storage backends behind the shared traits.
    let (queue, idempotency, registry): (
        Arc<dyn JobQueue>,
        Arc<dyn IdempotencyStore>,
        Arc<dyn TenantRegistry>,
    ) = match config.storage_mode {
        StorageMode::Memory => {
            info!("using in-memory storage; state will not survive restarts");
            (
                Arc::new(MemoryJobQueue::new(clock.clone())),
                Arc::new(MemoryIdempotencyStore::new(clock.clone())),
                Arc::new(MemoryTenantRegistry::new(clock.clone())),
            )
        },
        StorageMode::Postgres => {
            info!(database_url = %config.database_url_masked(), "connecting to PostgreSQL");
            let pool = PgPoolOptions::new()
                .max_connections(config.database_max_connections)
                .acquire_timeout(Duration::from_secs(10))
                .connect(&config.database_url)
                .await
                .context("failed to connect to database")?;

            run_migrations(&pool).await?;

            let storage = PostgresStorage::new(pool, clock.clone());
            storage.health_check().await.context("database health check failed")?;
            (storage.queue.clone(), storage.idempotency.clone(), storage.tenants.clone())
        },
    };

    let limiter = Arc::new(RateLimiter::new(config.to_rate_limit_config(), clock.clone()));

    // Channel adapters: the relay plus any configured direct endpoints.
    let adapter_config = config.to_http_adapter_config();
    let relay = Arc::new(
        RelayAdapter::new(config.relay_url.clone(), adapter_config.clone())
            .context("failed to build relay adapter")?,
    );
    let direct = adapter::direct_adapters(&config.parse_direct_endpoints()?, &adapter_config)
        .context("failed to build direct adapters")?;
    let publisher = Arc::new(Publisher::new(relay, direct, config.to_publisher_config()));

    let ctx = ConsumerContext {
        queue: queue.clone(),
        idempotency: idempotency.clone(),
        registry: registry.clone(),
        publisher,
        clock: clock.clone(),
    };
    let mut engine = PublishEngine::new(ctx, config.to_consumer_config());
    engine.start().await;

    let state = AppState { queue, idempotency, registry, limiter, clock };
    let addr = config.parse_server_addr()?;
    let request_timeout = Duration::from_secs(config.request_timeout_secs);

    info!(%addr, "Clubcast is ready to accept posts");

    if let Err(e) = clubcast_api::start_server(state, addr, request_timeout).await {
        error!(error = %e, "server failed");
    }

    // Server returned after the shutdown signal; stop the workers.
    engine.shutdown().await.context("engine shutdown failed")?;

    info!("Clubcast shutdown complete");
    Ok(())
}

/// Initializes tracing with environment-based configuration.
fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,clubcast=debug,tower_http=debug"))
        .expect("invalid RUST_LOG environment variable");

    let fmt_layer = fmt::layer().with_target(true).with_file(true).with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

/// Ensures the pipeline tables exist.
async fn run_migrations(pool: &sqlx::PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS publish_jobs (
            id UUID PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            template TEXT NOT NULL,
            channels JSONB NOT NULL,
            data JSONB NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            idempotency_key TEXT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            next_attempt_at TIMESTAMPTZ NOT NULL,
            claimed_until TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create publish_jobs table")?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_publish_jobs_due
        ON publish_jobs(next_attempt_at)
        WHERE claimed_until IS NULL
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create publish_jobs index")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS idempotency_records (
            key TEXT PRIMARY KEY,
            status TEXT NOT NULL,
            response JSONB,
            stored_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create idempotency_records table")?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tenants (
            key TEXT PRIMARY KEY,
            record JSONB NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .context("failed to create tenants table")?;

    Ok(())
}
