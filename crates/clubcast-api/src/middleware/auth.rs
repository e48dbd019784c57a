//! Auth context extraction with tenant isolation.
//!
//! Identity verification happens upstream (gateway or identity provider);
//! this middleware only materializes the verified `(tenant, user, roles)`
//! context from trusted headers and rejects requests that arrive without
//! one. Authorization invariants (tenant match, admin-only routes) are
//! enforced in the handlers against this context.

use axum::{
    body::Body,
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use clubcast_core::models::TenantId;

use crate::error::ApiError;

/// Verified caller identity attached to each request.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Tenant the caller belongs to.
    pub tenant_id: TenantId,
    /// Caller's user identifier.
    pub user_id: String,
    /// Caller's roles, e.g. `member`, `admin`.
    pub roles: Vec<String>,
}

impl AuthContext {
    /// Whether the caller holds the admin role.
    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|r| r == "admin")
    }
}

/// Builds the auth context from the trusted identity headers.
fn extract_context(headers: &HeaderMap) -> Option<AuthContext> {
    let tenant = headers.get("x-auth-tenant").and_then(|v| v.to_str().ok())?;
    let user = headers.get("x-auth-user").and_then(|v| v.to_str().ok())?;

    if tenant.is_empty() || user.is_empty() {
        return None;
    }

    let roles = headers
        .get("x-auth-roles")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').map(|r| r.trim().to_string()).filter(|r| !r.is_empty()).collect())
        .unwrap_or_default();

    Some(AuthContext { tenant_id: TenantId::from(tenant), user_id: user.to_string(), roles })
}

/// Axum middleware that requires a verified auth context.
pub async fn auth_middleware(mut req: Request<Body>, next: Next) -> Result<Response, ApiError> {
    let context = extract_context(req.headers())
        .ok_or_else(|| ApiError::Unauthenticated("missing auth context".to_string()))?;

    req.extensions_mut().insert(context);

    Ok(next.run(req).await)
}
