//! Core domain models and shared infrastructure for the publish pipeline.
//!
//! Provides strongly-typed domain primitives, the idempotency store, the
//! per-tenant rate limiter, the tenant registry, and the job queue. All
//! other crates depend on these foundational types for type safety and
//! consistency.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod idempotency;
pub mod models;
pub mod queue;
pub mod ratelimit;
pub mod registry;
pub mod storage;
pub mod time;

pub use error::{CoreError, Result};
pub use idempotency::{derive_key, IdempotencyRecord, IdempotencyStatus, IdempotencyStore};
pub use models::{
    Channel, JobId, JobOutcome, PostJob, PublishResult, PublishStatus, QueuedJob, TenantId,
    TenantPlan, TenantRecord,
};
pub use queue::JobQueue;
pub use ratelimit::{RateDecision, RateLimitConfig, RateLimiter};
pub use registry::TenantRegistry;
pub use time::{Clock, SystemClock, TestClock};
