//! Rate-limit check sub-protocol.
//!
//! Lets tenant-side automations spend and inspect their budget through the
//! same bucket the ingress uses. A check here consumes a token exactly like
//! a post submission does.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde::{Deserialize, Serialize};

use crate::{error::ApiError, middleware::auth::AuthContext, state::AppState};

/// Query parameters for a bucket check.
#[derive(Debug, Deserialize)]
pub struct CheckParams {
    /// Bucket key, `<tenantId>:<operation>`.
    pub bucket: String,
}

/// Response body for a bucket check.
#[derive(Debug, Serialize)]
pub struct CheckResponse {
    /// Whether the check was admitted.
    pub ok: bool,
    /// Bucket capacity.
    pub limit: u32,
    /// Tokens remaining after this check.
    pub remaining: u32,
    /// Unix timestamp when the bucket next gains a token.
    pub reset: i64,
}

/// Checks (and spends from) a rate-limit bucket.
///
/// # Errors
///
/// Returns 403 when the bucket belongs to another tenant, 429 when the
/// bucket is exhausted.
pub async fn check_rate_limit(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(params): Query<CheckParams>,
) -> Result<Response, ApiError> {
    let owner = params.bucket.split(':').next().unwrap_or_default();
    if owner != auth.tenant_id.as_str() && !auth.is_admin() {
        return Err(ApiError::Forbidden("bucket belongs to another tenant".to_string()));
    }

    let decision = state.limiter.check(&params.bucket).await;
    let body = CheckResponse {
        ok: decision.allowed,
        limit: decision.limit,
        remaining: decision.remaining,
        reset: decision.reset_at.timestamp(),
    };

    let status =
        if decision.allowed { StatusCode::OK } else { StatusCode::TOO_MANY_REQUESTS };
    Ok((status, Json(body)).into_response())
}
