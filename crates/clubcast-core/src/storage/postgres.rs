//! PostgreSQL implementations of the storage traits.
//!
//! The queue uses `FOR UPDATE SKIP LOCKED` claiming so multiple consumer
//! processes share one table without contention. Timestamps are bound from
//! the injected clock rather than `NOW()` so every store observes the same
//! timeline.

use std::{future::Future, pin::Pin, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use sqlx::{PgPool, Row};
use tracing::warn;

use crate::{
    error::{CoreError, Result},
    idempotency::{IdempotencyRecord, IdempotencyStatus, IdempotencyStore, RETENTION_HOURS},
    models::{Channel, JobId, JobOutcome, PostJob, QueuedJob, TenantId, TenantRecord},
    queue::JobQueue,
    registry::TenantRegistry,
    time::Clock,
};

/// How long a claimed row stays invisible before redelivery.
const VISIBILITY_SECS: i64 = 60;

/// Durable job queue over a `publish_jobs` table.
pub struct PostgresJobQueue {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl PostgresJobQueue {
    /// Creates a queue over the given pool.
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }
}

fn row_to_queued(row: &sqlx::postgres::PgRow) -> Result<QueuedJob> {
    let channels: serde_json::Value = row.try_get("channels").map_err(CoreError::from)?;
    let channels: Vec<Channel> = serde_json::from_value(channels)?;

    Ok(QueuedJob {
        job: PostJob {
            id: JobId(row.try_get("id").map_err(CoreError::from)?),
            tenant_id: TenantId(row.try_get("tenant_id").map_err(CoreError::from)?),
            template: row.try_get("template").map_err(CoreError::from)?,
            channels,
            data: row.try_get("data").map_err(CoreError::from)?,
            created_at: row.try_get("created_at").map_err(CoreError::from)?,
            idempotency_key: row.try_get("idempotency_key").map_err(CoreError::from)?,
        },
        attempts: u32::try_from(row.try_get::<i32, _>("attempts").map_err(CoreError::from)?)
            .unwrap_or(0),
        next_attempt_at: row.try_get("next_attempt_at").map_err(CoreError::from)?,
    })
}

impl JobQueue for PostgresJobQueue {
    fn enqueue(&self, job: PostJob) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let now = self.clock.now();
            sqlx::query(
                r"
                INSERT INTO publish_jobs (
                    id, tenant_id, template, channels, data,
                    created_at, idempotency_key, attempts, next_attempt_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, 0, $8)
                ",
            )
            .bind(job.id.0)
            .bind(job.tenant_id.as_str())
            .bind(&job.template)
            .bind(serde_json::to_value(&job.channels)?)
            .bind(&job.data)
            .bind(job.created_at)
            .bind(&job.idempotency_key)
            .bind(now)
            .execute(&self.pool)
            .await?;

            Ok(())
        })
    }

    fn claim(
        &self,
        batch_size: usize,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<QueuedJob>>> + Send + '_>> {
        Box::pin(async move {
            let now = self.clock.now();
            let deadline = now + Duration::seconds(VISIBILITY_SECS);

            let rows = sqlx::query(
                r"
                UPDATE publish_jobs
                SET attempts = attempts + 1, claimed_until = $2
                WHERE id IN (
                    SELECT id FROM publish_jobs
                    WHERE next_attempt_at <= $1
                      AND (claimed_until IS NULL OR claimed_until <= $1)
                    ORDER BY next_attempt_at, created_at
                    LIMIT $3
                    FOR UPDATE SKIP LOCKED
                )
                RETURNING id, tenant_id, template, channels, data,
                          created_at, idempotency_key, attempts, next_attempt_at
                ",
            )
            .bind(now)
            .bind(deadline)
            .bind(i64::try_from(batch_size).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;

            rows.iter().map(row_to_queued).collect()
        })
    }

    fn ack(&self, job_id: JobId) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            sqlx::query("DELETE FROM publish_jobs WHERE id = $1")
                .bind(job_id.0)
                .execute(&self.pool)
                .await?;
            Ok(())
        })
    }

    fn nack(
        &self,
        job_id: JobId,
        next_attempt_at: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            sqlx::query(
                r"
                UPDATE publish_jobs
                SET next_attempt_at = $2, claimed_until = NULL
                WHERE id = $1
                ",
            )
            .bind(job_id.0)
            .bind(next_attempt_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
    }

    fn depth(&self) -> Pin<Box<dyn Future<Output = Result<usize>> + Send + '_>> {
        Box::pin(async move {
            let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM publish_jobs")
                .fetch_one(&self.pool)
                .await?;
            Ok(usize::try_from(count.0).unwrap_or(0))
        })
    }
}

/// Durable idempotency store over an `idempotency_records` table.
///
/// Keys follow the `idem:<tenant>:<hash-or-token>` layout; the retention
/// window is enforced by filtering on `stored_at` at read time and a
/// best-effort delete on write.
pub struct PostgresIdempotencyStore {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl PostgresIdempotencyStore {
    /// Creates a store over the given pool.
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }
}

impl IdempotencyStore for PostgresIdempotencyStore {
    fn check(
        &self,
        key: &str,
    ) -> Pin<Box<dyn Future<Output = Result<Option<IdempotencyRecord>>> + Send + '_>> {
        let key = format!("idem:{key}");
        Box::pin(async move {
            let cutoff = self.clock.now() - Duration::hours(RETENTION_HOURS);
            let row = sqlx::query(
                r"
                SELECT response, stored_at FROM idempotency_records
                WHERE key = $1 AND status = 'stored' AND stored_at > $2
                ",
            )
            .bind(&key)
            .bind(cutoff)
            .fetch_optional(&self.pool)
            .await?;

            match row {
                Some(row) => {
                    let response: Option<serde_json::Value> =
                        row.try_get("response").map_err(CoreError::from)?;
                    let outcome = response.map(serde_json::from_value).transpose()?;
                    Ok(Some(IdempotencyRecord {
                        status: IdempotencyStatus::Stored,
                        response: outcome,
                        stored_at: row.try_get("stored_at").map_err(CoreError::from)?,
                    }))
                },
                None => Ok(None),
            }
        })
    }

    fn begin(&self, key: &str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let key = format!("idem:{key}");
        Box::pin(async move {
            let now = self.clock.now();
            // DO NOTHING keeps a committed record from being downgraded.
            sqlx::query(
                r"
                INSERT INTO idempotency_records (key, status, response, stored_at)
                VALUES ($1, 'pending', NULL, $2)
                ON CONFLICT (key) DO NOTHING
                ",
            )
            .bind(&key)
            .bind(now)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
    }

    fn commit(
        &self,
        key: &str,
        outcome: &JobOutcome,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let key = format!("idem:{key}");
        let outcome = outcome.clone();
        Box::pin(async move {
            let now = self.clock.now();
            sqlx::query(
                r"
                INSERT INTO idempotency_records (key, status, response, stored_at)
                VALUES ($1, 'stored', $2, $3)
                ON CONFLICT (key)
                DO UPDATE SET status = 'stored', response = $2, stored_at = $3
                ",
            )
            .bind(&key)
            .bind(serde_json::to_value(&outcome)?)
            .bind(now)
            .execute(&self.pool)
            .await?;

            let cutoff = now - Duration::hours(RETENTION_HOURS);
            sqlx::query("DELETE FROM idempotency_records WHERE stored_at <= $1")
                .bind(cutoff)
                .execute(&self.pool)
                .await?;

            Ok(())
        })
    }
}

/// Durable tenant registry over a `tenants` table.
pub struct PostgresTenantRegistry {
    pool: PgPool,
    clock: Arc<dyn Clock>,
}

impl PostgresTenantRegistry {
    /// Creates a registry over the given pool.
    pub fn new(pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self { pool, clock }
    }
}

impl TenantRegistry for PostgresTenantRegistry {
    fn get(&self, tenant: &TenantId) -> Pin<Box<dyn Future<Output = TenantRecord> + Send + '_>> {
        let tenant = tenant.clone();
        Box::pin(async move {
            let key = format!("tenant:{tenant}");
            let row = sqlx::query("SELECT record FROM tenants WHERE key = $1")
                .bind(&key)
                .fetch_optional(&self.pool)
                .await;

            // Reads fail open to the safe default: a registry outage must
            // not block publishing, it only disables direct routing.
            match row {
                Ok(Some(row)) => row
                    .try_get::<serde_json::Value, _>("record")
                    .ok()
                    .and_then(|v| serde_json::from_value(v).ok())
                    .unwrap_or_else(|| {
                        TenantRecord::with_defaults(tenant.clone(), self.clock.now())
                    }),
                Ok(None) => TenantRecord::with_defaults(tenant, self.clock.now()),
                Err(error) => {
                    warn!(%tenant, %error, "tenant lookup failed, using defaults");
                    TenantRecord::with_defaults(tenant, self.clock.now())
                },
            }
        })
    }

    fn put(&self, record: TenantRecord) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let key = format!("tenant:{}", record.id);
            sqlx::query(
                r"
                INSERT INTO tenants (key, record, updated_at)
                VALUES ($1, $2, $3)
                ON CONFLICT (key) DO UPDATE SET record = $2, updated_at = $3
                ",
            )
            .bind(&key)
            .bind(serde_json::to_value(&record)?)
            .bind(record.updated_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
    }
}
