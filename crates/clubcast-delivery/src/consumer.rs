//! Queue consumer workers.
//!
//! Each worker claims batches of queued jobs, publishes every requested
//! channel through the orchestrator, commits the aggregated outcome to the
//! idempotency store, and acknowledges the job. Job-level errors are
//! redelivered with backoff until the attempt budget runs out, after which
//! the job is committed as dead-lettered and removed — a poison message can
//! never grow the queue unbounded.
//!
//! A terminally failed channel (timeout, rejection) is not a job-level
//! error: it stays inside the success aggregate as an `ok: false` result.
//! Only transient relay failures escape the orchestrator and reach the
//! retry path here, since in that case nothing was delivered for the
//! channel and redelivery is the at-least-once contract working as
//! intended.

use std::{collections::HashMap, sync::Arc, time::Duration};

use clubcast_core::{
    models::{JobOutcome, PublishResult, QueuedJob},
    Clock, IdempotencyStore, JobQueue, TenantRegistry,
};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    error::{PublishError, Result},
    orchestrator::Publisher,
    retry::{RetryDecision, RetryPolicy},
};

/// Configuration for the consumer workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Number of concurrent consumer workers.
    pub worker_count: usize,

    /// Maximum jobs to claim per worker batch.
    pub batch_size: usize,

    /// How often workers poll an empty queue.
    pub poll_interval: Duration,

    /// Job redelivery policy.
    pub retry_policy: RetryPolicy,

    /// Maximum time to wait for workers during shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            worker_count: crate::DEFAULT_WORKER_COUNT,
            batch_size: crate::DEFAULT_BATCH_SIZE,
            poll_interval: Duration::from_secs(1),
            retry_policy: RetryPolicy::default(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Counters for engine monitoring.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    /// Number of running consumer workers.
    pub active_workers: usize,
    /// Jobs claimed and handled since startup.
    pub jobs_processed: u64,
    /// Jobs committed with a success aggregate.
    pub jobs_completed: u64,
    /// Jobs returned to the queue for redelivery.
    pub jobs_retried: u64,
    /// Jobs committed as dead-lettered.
    pub jobs_dead_lettered: u64,
    /// Individual channel publishes that succeeded.
    pub channels_published: u64,
    /// Individual channel publishes that failed terminally.
    pub channels_failed: u64,
}

/// Shared dependencies handed to every worker.
#[derive(Clone)]
pub struct ConsumerContext {
    /// Job queue to drain.
    pub queue: Arc<dyn JobQueue>,
    /// Store receiving terminal outcomes.
    pub idempotency: Arc<dyn IdempotencyStore>,
    /// Tenant configuration source.
    pub registry: Arc<dyn TenantRegistry>,
    /// Channel routing orchestrator.
    pub publisher: Arc<Publisher>,
    /// Time source for schedules and polling.
    pub clock: Arc<dyn Clock>,
}

/// One consumer worker draining the job queue.
pub struct ConsumerWorker {
    id: usize,
    ctx: ConsumerContext,
    config: ConsumerConfig,
    stats: Arc<RwLock<EngineStats>>,
    cancellation_token: CancellationToken,
}

impl ConsumerWorker {
    /// Creates a worker with the given identity and shared state.
    pub fn new(
        id: usize,
        ctx: ConsumerContext,
        config: ConsumerConfig,
        stats: Arc<RwLock<EngineStats>>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self { id, ctx, config, stats, cancellation_token }
    }

    /// Main worker loop: claims and processes batches until cancelled.
    ///
    /// # Errors
    ///
    /// Returns error only on setup failure; batch errors are logged and the
    /// loop continues after a pause.
    pub async fn run(&self) -> Result<()> {
        info!(worker_id = self.id, "consumer worker starting");

        loop {
            if self.cancellation_token.is_cancelled() {
                info!(worker_id = self.id, "consumer worker received shutdown signal");
                break;
            }

            match self.process_batch().await {
                Ok(0) => {
                    tokio::select! {
                        () = self.ctx.clock.sleep(self.config.poll_interval) => {},
                        () = self.cancellation_token.cancelled() => break,
                    }
                },
                Ok(_) => {},
                Err(error) => {
                    error!(worker_id = self.id, %error, "batch processing failed");
                    tokio::select! {
                        () = self.ctx.clock.sleep(Duration::from_secs(5)) => {},
                        () = self.cancellation_token.cancelled() => break,
                    }
                },
            }
        }

        info!(worker_id = self.id, "consumer worker stopped");
        Ok(())
    }

    /// Claims and processes one batch. Returns the number of jobs claimed.
    ///
    /// # Errors
    ///
    /// Returns error if claiming from the queue fails.
    pub async fn process_batch(&self) -> Result<usize> {
        let jobs = self
            .ctx
            .queue
            .claim(self.config.batch_size)
            .await
            .map_err(|e| PublishError::storage(format!("failed to claim jobs: {e}")))?;
        let batch_size = jobs.len();

        debug!(worker_id = self.id, batch_size, "processing job batch");

        for queued in jobs {
            if self.cancellation_token.is_cancelled() {
                break;
            }

            let job_id = queued.job.id;
            match self.process_job(&queued).await {
                Ok(()) => {},
                Err(error) => {
                    if let Err(handling_error) = self.handle_job_error(&queued, &error).await {
                        error!(
                            worker_id = self.id,
                            %job_id,
                            error = %handling_error,
                            "failed to handle job error"
                        );
                    }
                },
            }

            let mut stats = self.stats.write().await;
            stats.jobs_processed += 1;
        }

        Ok(batch_size)
    }

    /// Publishes all channels of one job and commits the outcome.
    async fn process_job(&self, queued: &QueuedJob) -> Result<()> {
        let job = &queued.job;
        let tenant = self.ctx.registry.get(&job.tenant_id).await;

        debug!(
            worker_id = self.id,
            job_id = %job.id,
            tenant = %job.tenant_id,
            template = %job.template,
            attempt = queued.attempts,
            "processing publish job"
        );

        let mut results: HashMap<_, PublishResult> = HashMap::new();
        for &channel in &job.channels {
            let result =
                self.ctx.publisher.publish(&tenant, channel, &job.template, &job.data).await?;

            {
                let mut stats = self.stats.write().await;
                if result.ok {
                    stats.channels_published += 1;
                } else {
                    stats.channels_failed += 1;
                }
            }

            results.insert(channel, result);
        }

        let outcome = JobOutcome::completed(results);
        self.ctx
            .idempotency
            .commit(&job.idempotency_key, &outcome)
            .await
            .map_err(|e| PublishError::storage(format!("failed to commit outcome: {e}")))?;

        self.ctx
            .queue
            .ack(job.id)
            .await
            .map_err(|e| PublishError::storage(format!("failed to ack job: {e}")))?;

        {
            let mut stats = self.stats.write().await;
            stats.jobs_completed += 1;
        }

        info!(
            worker_id = self.id,
            job_id = %job.id,
            tenant = %job.tenant_id,
            channels = job.channels.len(),
            "publish job completed"
        );
        Ok(())
    }

    /// Applies the retry policy to a job that errored out of processing.
    async fn handle_job_error(&self, queued: &QueuedJob, cause: &PublishError) -> Result<()> {
        let job = &queued.job;
        let now = self.ctx.clock.now();

        match self.config.retry_policy.decide(queued.attempts, now) {
            RetryDecision::Retry { next_attempt_at } => {
                self.ctx
                    .queue
                    .nack(job.id, next_attempt_at)
                    .await
                    .map_err(|e| PublishError::storage(format!("failed to nack job: {e}")))?;

                {
                    let mut stats = self.stats.write().await;
                    stats.jobs_retried += 1;
                }

                warn!(
                    worker_id = self.id,
                    job_id = %job.id,
                    attempt = queued.attempts,
                    next_retry_at = %next_attempt_at,
                    error = %cause,
                    "job failed, redelivery scheduled"
                );
            },
            RetryDecision::GiveUp { reason } => {
                let outcome = JobOutcome::dead_letter(format!("{reason}: {cause}"));

                // The queue must shrink even if the terminal commit fails;
                // a lost DLQ record only costs replay visibility.
                if let Err(commit_error) =
                    self.ctx.idempotency.commit(&job.idempotency_key, &outcome).await
                {
                    error!(
                        worker_id = self.id,
                        job_id = %job.id,
                        error = %commit_error,
                        "failed to commit dead-letter outcome"
                    );
                }

                self.ctx
                    .queue
                    .ack(job.id)
                    .await
                    .map_err(|e| PublishError::storage(format!("failed to ack job: {e}")))?;

                {
                    let mut stats = self.stats.write().await;
                    stats.jobs_dead_lettered += 1;
                }

                error!(
                    worker_id = self.id,
                    job_id = %job.id,
                    attempts = queued.attempts,
                    reason = %reason,
                    error = %cause,
                    "job dead-lettered"
                );
            },
        }

        Ok(())
    }
}
