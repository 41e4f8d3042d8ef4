// handlers/protected/tenants.rs - /api/tenants (any token) and /api/tenant (tenant-scoped)

use axum::{extract::State, Extension};

use crate::app::AppState;
use crate::database::models::{Tenant, TenantMembershipSummary};
use crate::middleware::{ApiResponse, ApiResult, AuthUser};
use crate::services::tenant_service::{CreateTenantRequest, UpdateTenantRequest};
use crate::services::{AccessContext, TenantService};
use crate::validation::ValidatedJson;

/// GET /api/tenants - tenants the caller belongs to
pub async fn tenants_get(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> ApiResult<Vec<TenantMembershipSummary>> {
    let tenants = TenantService::new(state.pool).list_for_user(auth.user_id).await?;
    Ok(ApiResponse::success(tenants))
}

/// POST /api/tenants - provision a tenant owned by the caller
pub async fn tenants_post(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ValidatedJson(req): ValidatedJson<CreateTenantRequest>,
) -> ApiResult<Tenant> {
    let tenant = TenantService::new(state.pool).create(auth.user_id, &req).await?;
    Ok(ApiResponse::created(tenant))
}

pub async fn tenant_get(State(state): State<AppState>, Extension(ctx): Extension<AccessContext>) -> ApiResult<Tenant> {
    let tenant = TenantService::new(state.pool).current(&ctx)?;
    Ok(ApiResponse::success(tenant))
}

pub async fn tenant_patch(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    ValidatedJson(req): ValidatedJson<UpdateTenantRequest>,
) -> ApiResult<Tenant> {
    let tenant = TenantService::new(state.pool).update(&ctx, &req).await?;
    Ok(ApiResponse::success(tenant))
}

/// DELETE /api/tenant - owner only, soft delete
pub async fn tenant_delete(State(state): State<AppState>, Extension(ctx): Extension<AccessContext>) -> ApiResult<()> {
    TenantService::new(state.pool).delete(&ctx).await?;
    Ok(ApiResponse::no_content())
}
