//! HTTP request handlers.

pub mod health;
pub mod post;
pub mod ratelimit;
pub mod tenants;

pub use health::{health_check, liveness_check, readiness_check};
pub use post::{ingest_post, poll_post};
pub use ratelimit::check_rate_limit;
pub use tenants::update_tenant;
