//! HTTP ingress for the Clubcast publish pipeline.
//!
//! Validates, authenticates, rate-limits, deduplicates, and enqueues post
//! requests, answering synchronously with either a cached outcome or an
//! acceptance acknowledgment.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod server;
pub mod state;

pub use config::{Config, StorageMode};
pub use error::ApiError;
pub use server::{create_router, create_router_with_timeout, start_server};
pub use state::AppState;
