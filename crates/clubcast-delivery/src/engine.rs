//! Publish engine coordinating the consumer worker pool.

use std::sync::Arc;

use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    consumer::{ConsumerConfig, ConsumerContext, ConsumerWorker, EngineStats},
    error::Result,
    pool::ConsumerPool,
};

/// Main engine driving publish-job consumption.
///
/// Owns the worker pool lifecycle. [`PublishEngine::process_batch`] runs a
/// single synchronous batch without background workers, which is what tests
/// and cron-style deployments use.
pub struct PublishEngine {
    ctx: ConsumerContext,
    config: ConsumerConfig,
    stats: Arc<RwLock<EngineStats>>,
    cancellation_token: CancellationToken,
    pool: Option<ConsumerPool>,
}

impl PublishEngine {
    /// Creates an engine over the shared pipeline dependencies.
    pub fn new(ctx: ConsumerContext, config: ConsumerConfig) -> Self {
        Self {
            ctx,
            config,
            stats: Arc::new(RwLock::new(EngineStats::default())),
            cancellation_token: CancellationToken::new(),
            pool: None,
        }
    }

    /// Starts the configured worker pool.
    ///
    /// Returns immediately after spawning; use [`Self::shutdown`] to stop.
    pub async fn start(&mut self) {
        info!(
            worker_count = self.config.worker_count,
            batch_size = self.config.batch_size,
            "starting publish engine"
        );

        let mut pool = ConsumerPool::new(
            self.ctx.clone(),
            self.config.clone(),
            self.stats.clone(),
            self.cancellation_token.clone(),
        );
        pool.spawn_workers().await;
        self.pool = Some(pool);
    }

    /// Gracefully shuts down the engine.
    ///
    /// # Errors
    ///
    /// Returns error if workers do not stop within the shutdown timeout.
    pub async fn shutdown(mut self) -> Result<()> {
        info!("shutting down publish engine");

        if let Some(pool) = self.pool.take() {
            pool.shutdown_graceful(self.config.shutdown_timeout).await?;
        }
        Ok(())
    }

    /// Processes exactly one batch synchronously, without workers.
    ///
    /// # Errors
    ///
    /// Returns error if claiming from the queue fails.
    pub async fn process_batch(&self) -> Result<usize> {
        let worker = ConsumerWorker::new(
            0,
            self.ctx.clone(),
            self.config.clone(),
            self.stats.clone(),
            self.cancellation_token.clone(),
        );
        worker.process_batch().await
    }

    /// Current engine statistics.
    pub async fn stats(&self) -> EngineStats {
        self.stats.read().await.clone()
    }
}
