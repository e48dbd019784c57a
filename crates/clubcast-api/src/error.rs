//! HTTP error taxonomy and response mapping.
//!
//! Every error renders as `{success: false, error: {code, message}}` with
//! the taxonomy's status code. Rate-limit rejections additionally carry the
//! `x-ratelimit-*` headers so clients can schedule their retry.

use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// Request-level errors surfaced by the HTTP ingress.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed or missing request fields. Not retryable.
    #[error("{0}")]
    Validation(String),

    /// Missing or unusable auth context.
    #[error("{0}")]
    Unauthenticated(String),

    /// Authenticated caller lacks access to the resource.
    #[error("{0}")]
    Forbidden(String),

    /// Tenant exhausted its token bucket. Retryable after reset.
    #[error("rate limit exceeded")]
    RateLimited {
        /// Bucket capacity.
        limit: u32,
        /// Tokens remaining.
        remaining: u32,
        /// When the bucket next gains a token.
        reset_at: DateTime<Utc>,
    },

    /// No record for the requested key.
    #[error("{0}")]
    NotFound(String),

    /// Storage backend refused a write the request cannot proceed without.
    #[error("storage unavailable")]
    Unavailable(String),

    /// Unexpected failure while handling the request.
    #[error("internal error")]
    Internal(String),
}

impl ApiError {
    /// Returns the taxonomy code for the error.
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION",
            Self::Unauthenticated(_) => "UNAUTHENTICATED",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Unavailable(_) => "STORAGE_UNAVAILABLE",
            Self::Internal(_) => "INTERNAL",
        }
    }

    const fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unavailable(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Error envelope returned to clients.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Always false for errors.
    pub success: bool,
    /// Error details.
    pub error: ErrorDetail,
}

/// Error code and message.
#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    /// Taxonomy code, e.g. `VALIDATION` or `RATE_LIMITED`.
    pub code: String,
    /// Human-readable description.
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = match &self {
            // Backend detail stays in the logs, not the response body.
            Self::Internal(detail) | Self::Unavailable(detail) => {
                tracing::error!(detail = %detail, "request failed on a backend error");
                self.to_string()
            },
            other => other.to_string(),
        };

        let body = ErrorResponse {
            success: false,
            error: ErrorDetail { code: self.code().to_string(), message },
        };

        let mut response = (self.status(), Json(body)).into_response();

        if let Self::RateLimited { limit, remaining, reset_at } = &self {
            let headers = response.headers_mut();
            if let Ok(value) = HeaderValue::from_str(&limit.to_string()) {
                headers.insert("x-ratelimit-limit", value);
            }
            if let Ok(value) = HeaderValue::from_str(&remaining.to_string()) {
                headers.insert("x-ratelimit-remaining", value);
            }
            if let Ok(value) = HeaderValue::from_str(&reset_at.timestamp().to_string()) {
                headers.insert("x-ratelimit-reset", value);
            }
        }

        response
    }
}
