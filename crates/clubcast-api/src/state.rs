//! Shared application state for the HTTP ingress.

use std::sync::Arc;

use clubcast_core::{Clock, IdempotencyStore, JobQueue, RateLimiter, TenantRegistry};

/// Dependencies every handler can reach through axum state.
#[derive(Clone)]
pub struct AppState {
    /// Queue accepted jobs are written to.
    pub queue: Arc<dyn JobQueue>,
    /// Idempotency store consulted before enqueueing.
    pub idempotency: Arc<dyn IdempotencyStore>,
    /// Tenant configuration source.
    pub registry: Arc<dyn TenantRegistry>,
    /// Per-tenant rate limiter.
    pub limiter: Arc<RateLimiter>,
    /// Time source.
    pub clock: Arc<dyn Clock>,
}
