//! Admin route for tenant record updates.
//!
//! Full tenant CRUD lives in the admin tooling outside this service; the
//! pipeline only exposes the record upsert the routing flags depend on,
//! guarded by the admin role.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension, Json,
};
use clubcast_core::models::{ChannelFlags, TenantId, TenantLimits, TenantPlan, TenantRecord};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument};

use crate::{error::ApiError, middleware::auth::AuthContext, state::AppState};

/// Request body for a tenant record upsert.
#[derive(Debug, Deserialize)]
pub struct UpdateTenantRequest {
    /// Deployment plan.
    pub plan: TenantPlan,
    /// Channel routing flags.
    #[serde(default)]
    pub flags: ChannelFlags,
    /// Credentials reference for direct adapters.
    #[serde(default)]
    pub channel_credentials_ref: Option<String>,
    /// Plan limits.
    #[serde(default)]
    pub limits: Option<TenantLimits>,
}

/// Upserts a tenant record. Admin only.
///
/// # Errors
///
/// Returns 403 for non-admin callers, 500 on storage failure.
#[instrument(name = "update_tenant", skip(state, request), fields(tenant = %tenant_id))]
pub async fn update_tenant(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(tenant_id): Path<String>,
    Json(request): Json<UpdateTenantRequest>,
) -> Result<Response, ApiError> {
    if !auth.is_admin() {
        return Err(ApiError::Forbidden("tenant updates require the admin role".to_string()));
    }

    let record = TenantRecord {
        id: TenantId::from(tenant_id.as_str()),
        plan: request.plan,
        flags: request.flags,
        channel_credentials_ref: request.channel_credentials_ref,
        limits: request.limits.unwrap_or_default(),
        updated_at: state.clock.now(),
    };

    state
        .registry
        .put(record)
        .await
        .map_err(|e| ApiError::Internal(format!("failed to store tenant record: {e}")))?;

    info!(tenant = %tenant_id, "tenant record updated");

    Ok((StatusCode::OK, Json(json!({"success": true}))).into_response())
}
