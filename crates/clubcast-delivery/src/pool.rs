//! Worker pool management with structured concurrency.
//!
//! Supervises consumer worker tasks, propagates cancellation, and waits for
//! in-flight jobs during graceful shutdown.

use std::{sync::Arc, time::Duration};

use tokio::{sync::RwLock, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    consumer::{ConsumerConfig, ConsumerContext, ConsumerWorker, EngineStats},
    error::{PublishError, Result},
};

/// Pool of supervised consumer workers.
pub struct ConsumerPool {
    ctx: ConsumerContext,
    config: ConsumerConfig,
    stats: Arc<RwLock<EngineStats>>,
    cancellation_token: CancellationToken,
    worker_handles: Vec<JoinHandle<Result<()>>>,
}

impl ConsumerPool {
    /// Creates a pool; workers are not started until [`Self::spawn_workers`].
    pub fn new(
        ctx: ConsumerContext,
        config: ConsumerConfig,
        stats: Arc<RwLock<EngineStats>>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self { ctx, config, stats, cancellation_token, worker_handles: Vec::new() }
    }

    /// Spawns all configured workers.
    pub async fn spawn_workers(&mut self) {
        info!(worker_count = self.config.worker_count, "spawning consumer workers");

        {
            let mut stats = self.stats.write().await;
            stats.active_workers = self.config.worker_count;
        }

        for worker_id in 0..self.config.worker_count {
            let worker = ConsumerWorker::new(
                worker_id,
                self.ctx.clone(),
                self.config.clone(),
                self.stats.clone(),
                self.cancellation_token.clone(),
            );

            let handle = tokio::spawn(async move {
                let result = worker.run().await;
                if let Err(ref error) = result {
                    error!(worker_id, %error, "consumer worker terminated with error");
                }
                result
            });

            self.worker_handles.push(handle);
        }
    }

    /// Signals cancellation and waits for workers within the timeout.
    ///
    /// # Errors
    ///
    /// Returns `PublishError::ShutdownTimeout` if workers fail to stop in
    /// time.
    pub async fn shutdown_graceful(mut self, timeout: Duration) -> Result<()> {
        info!(
            worker_count = self.worker_handles.len(),
            timeout_secs = timeout.as_secs(),
            "initiating graceful worker shutdown"
        );

        self.cancellation_token.cancel();

        let shutdown_future = async {
            for (worker_id, handle) in
                std::mem::take(&mut self.worker_handles).into_iter().enumerate()
            {
                match handle.await {
                    Ok(Ok(())) => {},
                    Ok(Err(error)) => {
                        warn!(worker_id, %error, "worker completed with error during shutdown");
                    },
                    Err(join_error) => {
                        error!(worker_id, error = %join_error, "worker task panicked");
                    },
                }
            }

            let mut stats = self.stats.write().await;
            stats.active_workers = 0;
        };

        match tokio::time::timeout(timeout, shutdown_future).await {
            Ok(()) => {
                info!("consumer pool shutdown completed");
                Ok(())
            },
            Err(_) => {
                error!(timeout_secs = timeout.as_secs(), "worker shutdown timed out");
                Err(PublishError::ShutdownTimeout { timeout })
            },
        }
    }

    /// Whether any worker task is still running.
    pub fn has_active_workers(&self) -> bool {
        self.worker_handles.iter().any(|h| !h.is_finished())
    }
}

impl Drop for ConsumerPool {
    fn drop(&mut self) {
        let active = self.worker_handles.iter().filter(|h| !h.is_finished()).count();
        if active > 0 && !self.cancellation_token.is_cancelled() {
            warn!(
                active_workers = active,
                "ConsumerPool dropped without shutdown_graceful, cancelling workers"
            );
            self.cancellation_token.cancel();
        }
    }
}
