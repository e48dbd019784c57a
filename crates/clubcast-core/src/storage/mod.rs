//! Durable storage backends for the pipeline's keyed state.
//!
//! The in-memory implementations living next to each trait cover tests and
//! single-node deployments; this module provides the PostgreSQL versions
//! for deployments that need the queue and idempotency window to survive
//! restarts. All SQL lives here — handlers and workers only see the traits.

use std::sync::Arc;

use sqlx::PgPool;

use crate::{error::Result, time::Clock};

pub mod postgres;

pub use postgres::{PostgresIdempotencyStore, PostgresJobQueue, PostgresTenantRegistry};

/// Container wiring all Postgres-backed stores over one connection pool.
#[derive(Clone)]
pub struct PostgresStorage {
    /// Durable job queue.
    pub queue: Arc<PostgresJobQueue>,
    /// Durable idempotency store.
    pub idempotency: Arc<PostgresIdempotencyStore>,
    /// Durable tenant registry.
    pub tenants: Arc<PostgresTenantRegistry>,
    pool: PgPool,
}

impl PostgresStorage {
    /// Creates all stores over a shared pool.
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self {
            queue: Arc::new(PostgresJobQueue::new(pool.clone(), clock.clone())),
            idempotency: Arc::new(PostgresIdempotencyStore::new(pool.clone(), clock.clone())),
            tenants: Arc::new(PostgresTenantRegistry::new(pool.clone(), clock)),
            pool,
        }
    }

    /// Verifies database connectivity for the readiness probe.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Storage` if the connection is unhealthy.
    pub async fn health_check(&self) -> Result<()> {
        let _: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }
}
