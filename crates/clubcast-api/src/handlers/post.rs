//! Post ingestion handler: validate, rate-limit, deduplicate, enqueue.
//!
//! Synchronous callers always get a deterministic answer: a fresh request
//! is acknowledged with `202 {queued: true}`, a replay of a completed
//! request gets the committed outcome with `200`, and a rate-limited
//! request gets `429` with reset metadata. Dead-lettered outcomes replay as
//! `{success: false, error: {code: "DLQ"}}`.

use std::str::FromStr;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use clubcast_core::{
    idempotency::derive_key,
    models::{Channel, JobId, JobOutcome, PostJob},
    RateLimiter,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

use crate::{error::ApiError, middleware::auth::AuthContext, state::AppState};

/// Request body for post submission.
#[derive(Debug, Deserialize)]
pub struct PostRequest {
    /// Tenant submitting the post.
    pub tenant: String,
    /// Content type identifier.
    pub template: String,
    /// Requested destination channels.
    pub channels: Vec<String>,
    /// Opaque content payload.
    #[serde(default)]
    pub data: Value,
}

/// Success envelope for post responses.
#[derive(Debug, Serialize)]
pub struct PostResponse {
    /// Always true for accepted/replayed requests.
    pub success: bool,
    /// Acknowledgment or replayed outcome.
    pub data: Value,
}

/// Accepts a post request into the publish pipeline.
///
/// # Errors
///
/// Returns the request taxonomy: 400 validation, 401 missing context,
/// 403 tenant mismatch, 429 rate limited, 500 internal.
#[instrument(
    name = "ingest_post",
    skip(state, headers, request),
    fields(
        tenant = %request.tenant,
        template = %request.template,
        idempotency_key = headers
            .get("idempotency-key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("derived"),
    )
)]
pub async fn ingest_post(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    headers: HeaderMap,
    Json(request): Json<PostRequest>,
) -> Result<Response, ApiError> {
    let channels = validate_request(&request)?;

    if auth.tenant_id.as_str() != request.tenant && !auth.is_admin() {
        return Err(ApiError::Forbidden(format!(
            "caller is not a member of tenant {}",
            request.tenant
        )));
    }

    let tenant_id = clubcast_core::models::TenantId::from(request.tenant.as_str());

    let decision =
        state.limiter.check(&RateLimiter::bucket_key(&tenant_id, "post")).await;
    if !decision.allowed {
        return Err(ApiError::RateLimited {
            limit: decision.limit,
            remaining: decision.remaining,
            reset_at: decision.reset_at,
        });
    }

    let explicit_key = headers.get("idempotency-key").and_then(|v| v.to_str().ok());
    let payload = json!({
        "template": &request.template,
        "channels": &channels,
        "data": &request.data,
    });
    let key = derive_key(&tenant_id, explicit_key, &payload);

    // Storage failures on check fail open: accepting a rare duplicate beats
    // refusing posts while the cache is down.
    match state.idempotency.check(&key).await {
        Ok(Some(record)) => {
            if let Some(outcome) = record.response {
                info!(%key, "idempotent replay, returning stored outcome");
                return Ok(replay_response(&outcome));
            }
        },
        Ok(None) => {},
        Err(error) => {
            warn!(%key, %error, "idempotency check failed, treating as miss");
        },
    }

    if let Err(error) = state.idempotency.begin(&key).await {
        warn!(%key, %error, "failed to write pending marker");
    }

    let job = PostJob {
        id: JobId::new(),
        tenant_id,
        template: request.template,
        channels,
        data: request.data,
        created_at: state.clock.now(),
        idempotency_key: key.clone(),
    };
    let job_id = job.id;

    state
        .queue
        .enqueue(job)
        .await
        .map_err(|e| ApiError::Unavailable(format!("failed to enqueue job: {e}")))?;

    debug!(%job_id, %key, "post job queued");

    Ok((
        StatusCode::ACCEPTED,
        Json(PostResponse { success: true, data: json!({"queued": true}) }),
    )
        .into_response())
}

/// Returns the committed outcome for an idempotency token.
///
/// The token is the part after the tenant prefix: a client-supplied
/// `idempotency-key` header value or the derived payload hash.
///
/// # Errors
///
/// Returns 404 if no completed outcome exists for the key.
#[instrument(name = "poll_post", skip(state))]
pub async fn poll_post(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(token): Path<String>,
) -> Result<Response, ApiError> {
    let key = format!("{}:{token}", auth.tenant_id);

    match state.idempotency.check(&key).await {
        Ok(Some(record)) => {
            let outcome = record
                .response
                .ok_or_else(|| ApiError::NotFound("outcome not yet committed".to_string()))?;
            Ok(replay_response(&outcome))
        },
        Ok(None) => Err(ApiError::NotFound(format!("no outcome for key {token}"))),
        Err(error) => Err(ApiError::Unavailable(format!("idempotency lookup failed: {error}"))),
    }
}

/// Renders a stored outcome for replay callers.
///
/// Both completed and dead-lettered outcomes return 200: the answer is
/// terminal either way, and the body's `success` field carries the verdict.
fn replay_response(outcome: &JobOutcome) -> Response {
    let body = if outcome.success {
        json!({"success": true, "data": {"results": &outcome.results}})
    } else {
        json!({"success": false, "error": &outcome.error})
    };
    (StatusCode::OK, Json(body)).into_response()
}

/// Validates the request schema and resolves channels.
fn validate_request(request: &PostRequest) -> Result<Vec<Channel>, ApiError> {
    if request.tenant.is_empty() {
        return Err(ApiError::Validation("tenant must not be empty".to_string()));
    }

    if request.template.is_empty() {
        return Err(ApiError::Validation("template must not be empty".to_string()));
    }

    if request.channels.is_empty() {
        return Err(ApiError::Validation("channels must not be empty".to_string()));
    }

    let mut channels = Vec::new();
    for name in &request.channels {
        let channel = Channel::from_str(name)
            .map_err(|_| ApiError::Validation(format!("unknown channel: {name}")))?;
        if !channels.contains(&channel) {
            channels.push(channel);
        }
    }

    Ok(channels)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(channels: Vec<&str>) -> PostRequest {
        PostRequest {
            tenant: "t1".to_string(),
            template: "goal".to_string(),
            channels: channels.into_iter().map(String::from).collect(),
            data: json!({}),
        }
    }

    #[test]
    fn channels_are_deduplicated_preserving_order() {
        let channels = validate_request(&request(vec!["yt", "fb", "yt", "fb"])).unwrap();

        assert_eq!(channels, vec![Channel::YouTube, Channel::Facebook]);
    }

    #[test]
    fn empty_channels_rejected() {
        let error = validate_request(&request(vec![])).unwrap_err();
        assert_eq!(error.code(), "VALIDATION");
    }

    #[test]
    fn unknown_channel_rejected() {
        let error = validate_request(&request(vec!["fb", "myspace"])).unwrap_err();
        assert_eq!(error.code(), "VALIDATION");
    }

    #[test]
    fn empty_template_rejected() {
        let mut req = request(vec!["fb"]);
        req.template = String::new();

        let error = validate_request(&req).unwrap_err();
        assert_eq!(error.code(), "VALIDATION");
    }
}
