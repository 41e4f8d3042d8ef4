use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use super::auth::AuthUser;
use crate::app::AppState;
use crate::error::ApiError;
use crate::services::RbacService;

/// Resolves the caller's tenant access for tenant-scoped routes.
///
/// Requires [`AuthUser`] from the JWT middleware and a token carrying a
/// tenant id. The tenant must be active and not deleted, and the caller must
/// hold an active membership; the resulting
/// [`AccessContext`](crate::services::AccessContext) is injected into request
/// extensions for handlers.
pub async fn validate_tenant_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth_user = request
        .extensions()
        .get::<AuthUser>()
        .cloned()
        .ok_or_else(|| ApiError::unauthorized("JWT authentication required before tenant validation"))?;

    let tenant_id = auth_user.tenant_id.ok_or_else(|| {
        ApiError::forbidden("Token is not scoped to a tenant; log in with a tenant to use this endpoint")
    })?;

    let ctx = RbacService::new(state.pool.clone())
        .load_access(tenant_id, auth_user.user_id, &auth_user.email)
        .await?;

    tracing::debug!(tenant = %ctx.tenant.slug, user = %ctx.user_id, "Tenant access resolved");

    request.extensions_mut().insert(ctx);
    Ok(next.run(request).await)
}
