//! Error types for channel publishing operations.
//!
//! Covers adapter-level failures (network, HTTP, timeout), relay failures,
//! and worker lifecycle errors. Categorization drives two decisions: which
//! direct-adapter failures fall back to the relay, and which job-level
//! errors are retried before dead-lettering.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for publishing operations.
pub type Result<T> = std::result::Result<T, PublishError>;

/// Error taxonomy for channel publishing.
#[derive(Debug, Clone, Error)]
pub enum PublishError {
    /// Network-level connectivity failure.
    #[error("network connection failed: {message}")]
    Network {
        /// Description of the network failure.
        message: String,
    },

    /// Adapter call exceeded its bounded timeout.
    #[error("publish timeout after {timeout_secs}s")]
    Timeout {
        /// Seconds before the attempt timed out.
        timeout_secs: u64,
    },

    /// Destination rejected the request (4xx).
    #[error("channel rejected request: HTTP {status}")]
    ChannelRejected {
        /// HTTP status code.
        status: u16,
        /// Response body content.
        body: String,
    },

    /// Destination failed to process the request (5xx).
    #[error("channel unavailable: HTTP {status}")]
    ChannelUnavailable {
        /// HTTP status code.
        status: u16,
        /// Response body content.
        body: String,
    },

    /// Destination rate-limited the adapter.
    #[error("channel rate limited: retry after {retry_after_secs}s")]
    ChannelRateLimited {
        /// Seconds to wait before retrying.
        retry_after_secs: u64,
    },

    /// Direct adapter cannot run without tenant credentials.
    #[error("no credentials configured for direct publishing")]
    MissingCredentials,

    /// Storage backend failed while persisting the job outcome.
    #[error("storage error: {message}")]
    Storage {
        /// Storage error message.
        message: String,
    },

    /// Worker shutdown requested.
    #[error("worker shutdown requested")]
    ShutdownRequested,

    /// Worker task panicked.
    #[error("worker {worker_id} panicked: {message}")]
    WorkerPanic {
        /// Identifier of the panicked worker.
        worker_id: usize,
        /// Panic message.
        message: String,
    },

    /// Graceful shutdown exceeded its deadline.
    #[error("shutdown timed out after {timeout:?}")]
    ShutdownTimeout {
        /// The exceeded deadline.
        timeout: Duration,
    },

    /// Unexpected internal error.
    #[error("internal publish error: {message}")]
    Internal {
        /// Internal error message.
        message: String,
    },
}

impl PublishError {
    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_secs: u64) -> Self {
        Self::Timeout { timeout_secs }
    }

    /// Creates a 4xx rejection error.
    pub fn rejected(status: u16, body: impl Into<String>) -> Self {
        Self::ChannelRejected { status, body: body.into() }
    }

    /// Creates a 5xx unavailability error.
    pub fn unavailable(status: u16, body: impl Into<String>) -> Self {
        Self::ChannelUnavailable { status, body: body.into() }
    }

    /// Creates a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage { message: message.into() }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Whether this failure is transient enough to retry at the job level.
    ///
    /// Only errors reaching the consumer's job handling consult this;
    /// per-channel failures are terminal results inside the aggregate.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. }
            | Self::Timeout { .. }
            | Self::ChannelUnavailable { .. }
            | Self::ChannelRateLimited { .. }
            | Self::Storage { .. } => true,

            Self::ChannelRejected { .. }
            | Self::MissingCredentials
            | Self::ShutdownRequested
            | Self::WorkerPanic { .. }
            | Self::ShutdownTimeout { .. }
            | Self::Internal { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors_identified_correctly() {
        assert!(PublishError::network("connection refused").is_retryable());
        assert!(PublishError::timeout(10).is_retryable());
        assert!(PublishError::unavailable(503, "down").is_retryable());
        assert!(PublishError::storage("pool exhausted").is_retryable());

        assert!(!PublishError::rejected(422, "bad payload").is_retryable());
        assert!(!PublishError::MissingCredentials.is_retryable());
        assert!(!PublishError::ShutdownRequested.is_retryable());
    }

    #[test]
    fn error_display_format() {
        assert_eq!(PublishError::timeout(10).to_string(), "publish timeout after 10s");
        assert_eq!(
            PublishError::rejected(422, "nope").to_string(),
            "channel rejected request: HTTP 422"
        );
    }
}
