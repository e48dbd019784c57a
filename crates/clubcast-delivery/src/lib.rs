//! Channel delivery engine for the publish pipeline.
//!
//! Consumes queued post jobs and delivers them to social/video channels
//! with relay fallback, bounded per-attempt timeouts, job-level retry with
//! exponential backoff, and dead-lettering.
//!
//! # Architecture
//!
//! Consumer workers claim job batches from the queue and run each job
//! through the full lifecycle:
//!
//! 1. **Claim** — worker claims due jobs (attempt counter increments)
//! 2. **Route** — orchestrator picks relay or direct adapter per channel
//! 3. **Publish** — adapter call under a bounded timeout
//! 4. **Commit** — aggregated outcome written through the idempotency
//!    store, job acknowledged or rescheduled
//!
//! The relay adapter is the always-available fallback: direct platform
//! adapters are per-tenant opt-ins that degrade to the relay on failure.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod adapter;
pub mod consumer;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod pool;
pub mod retry;

pub use adapter::{ChannelAdapter, DirectAdapter, HttpAdapterConfig, PublishRequest, RelayAdapter};
pub use consumer::{ConsumerConfig, ConsumerContext, EngineStats};
pub use engine::PublishEngine;
pub use error::{PublishError, Result};
pub use orchestrator::{Publisher, PublisherConfig};
pub use retry::{BackoffStrategy, RetryPolicy};

/// Default number of concurrent consumer workers.
pub const DEFAULT_WORKER_COUNT: usize = 3;

/// Default batch size for claiming jobs from the queue.
pub const DEFAULT_BATCH_SIZE: usize = 10;
