// handlers/protected/rbac.rs - /api/modules, /api/permissions, /api/roles

use axum::{extract::State, Extension};
use uuid::Uuid;

use crate::app::AppState;
use crate::database::models::{Permission, RoleWithPermissions, TenantModule};
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::rbac_service::{CreateRoleRequest, SetModuleRequest, SetPermissionsRequest, UpdateRoleRequest};
use crate::services::{AccessContext, RbacService};
use crate::validation::{ValidatedJson, ValidatedPath};

pub async fn modules_get(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
) -> ApiResult<Vec<TenantModule>> {
    let modules = RbacService::new(state.pool).list_modules(&ctx).await?;
    Ok(ApiResponse::success(modules))
}

/// PUT /api/modules/:key - enable or disable a module for the tenant
pub async fn module_put(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    ValidatedPath(key): ValidatedPath<String>,
    ValidatedJson(req): ValidatedJson<SetModuleRequest>,
) -> ApiResult<TenantModule> {
    let module = RbacService::new(state.pool).set_module_enabled(&ctx, &key, req.enabled).await?;
    Ok(ApiResponse::success(module))
}

pub async fn permissions_get(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
) -> ApiResult<Vec<Permission>> {
    let permissions = RbacService::new(state.pool).list_permissions(&ctx).await?;
    Ok(ApiResponse::success(permissions))
}

pub async fn roles_get(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
) -> ApiResult<Vec<RoleWithPermissions>> {
    let roles = RbacService::new(state.pool).list_roles(&ctx).await?;
    Ok(ApiResponse::success(roles))
}

pub async fn roles_post(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    ValidatedJson(req): ValidatedJson<CreateRoleRequest>,
) -> ApiResult<RoleWithPermissions> {
    let role = RbacService::new(state.pool)
        .create_role(&ctx, &req.name, req.description.as_deref(), &req.permissions)
        .await?;
    Ok(ApiResponse::created(role))
}

pub async fn role_get(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    ValidatedPath(id): ValidatedPath<Uuid>,
) -> ApiResult<RoleWithPermissions> {
    let role = RbacService::new(state.pool).get_role(&ctx, id).await?;
    Ok(ApiResponse::success(role))
}

pub async fn role_patch(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    ValidatedPath(id): ValidatedPath<Uuid>,
    ValidatedJson(req): ValidatedJson<UpdateRoleRequest>,
) -> ApiResult<RoleWithPermissions> {
    let role = RbacService::new(state.pool)
        .update_role(&ctx, id, req.name.as_deref(), req.description.as_deref())
        .await?;
    Ok(ApiResponse::success(role))
}

pub async fn role_delete(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    ValidatedPath(id): ValidatedPath<Uuid>,
) -> ApiResult<()> {
    RbacService::new(state.pool).delete_role(&ctx, id).await?;
    Ok(ApiResponse::no_content())
}

/// PUT /api/roles/:id/permissions - replace the role's permission set
pub async fn role_permissions_put(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    ValidatedPath(id): ValidatedPath<Uuid>,
    ValidatedJson(req): ValidatedJson<SetPermissionsRequest>,
) -> ApiResult<RoleWithPermissions> {
    let role = RbacService::new(state.pool)
        .set_role_permissions(&ctx, id, &req.permissions)
        .await?;
    Ok(ApiResponse::success(role))
}
