//! Error types and result handling for core pipeline operations.
//!
//! Covers storage-layer failures for the idempotency store, job queue, and
//! tenant registry. Request-level and delivery-level taxonomies live in the
//! api and delivery crates respectively.

use thiserror::Error;

/// Result type alias using [`CoreError`].
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error type for storage and validation failures.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend operation failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Entity not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid input.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Payload could not be serialized or deserialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<sqlx::Error> for CoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("requested entity not found".to_string()),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                Self::Storage(format!("unique constraint violation: {db_err}"))
            },
            _ => Self::Storage(err.to_string()),
        }
    }
}
