// handlers/protected/departments.rs - /api/departments and department membership

use axum::{extract::State, Extension};
use uuid::Uuid;

use crate::app::AppState;
use crate::config;
use crate::database::models::{Department, DepartmentMember};
use crate::filter::{ListParams, Page};
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::department_service::{
    AddDepartmentMemberRequest, CreateDepartmentRequest, DepartmentQuery, UpdateDepartmentMemberRequest,
    UpdateDepartmentRequest,
};
use crate::services::{AccessContext, DepartmentService};
use crate::validation::{ValidatedJson, ValidatedPath, ValidatedQuery};

pub async fn departments_get(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    ValidatedQuery(params): ValidatedQuery<ListParams>,
    ValidatedQuery(query): ValidatedQuery<DepartmentQuery>,
) -> ApiResult<Page<Department>> {
    let page = DepartmentService::new(state.pool)
        .list(&ctx, &config::config().api, &params, &query)
        .await?;
    Ok(ApiResponse::success(page))
}

pub async fn departments_post(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    ValidatedJson(req): ValidatedJson<CreateDepartmentRequest>,
) -> ApiResult<Department> {
    let department = DepartmentService::new(state.pool).create(&ctx, &req).await?;
    Ok(ApiResponse::created(department))
}

pub async fn department_get(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    ValidatedPath(id): ValidatedPath<Uuid>,
) -> ApiResult<Department> {
    let department = DepartmentService::new(state.pool).get(&ctx, id).await?;
    Ok(ApiResponse::success(department))
}

pub async fn department_patch(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    ValidatedPath(id): ValidatedPath<Uuid>,
    ValidatedJson(req): ValidatedJson<UpdateDepartmentRequest>,
) -> ApiResult<Department> {
    let department = DepartmentService::new(state.pool).update(&ctx, id, &req).await?;
    Ok(ApiResponse::success(department))
}

pub async fn department_delete(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    ValidatedPath(id): ValidatedPath<Uuid>,
) -> ApiResult<()> {
    DepartmentService::new(state.pool).delete(&ctx, id).await?;
    Ok(ApiResponse::no_content())
}

pub async fn department_members_get(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    ValidatedPath(id): ValidatedPath<Uuid>,
) -> ApiResult<Vec<DepartmentMember>> {
    let members = DepartmentService::new(state.pool).list_members(&ctx, id).await?;
    Ok(ApiResponse::success(members))
}

pub async fn department_members_post(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    ValidatedPath(id): ValidatedPath<Uuid>,
    ValidatedJson(req): ValidatedJson<AddDepartmentMemberRequest>,
) -> ApiResult<DepartmentMember> {
    let member = DepartmentService::new(state.pool).add_member(&ctx, id, &req).await?;
    Ok(ApiResponse::created(member))
}

pub async fn department_member_patch(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    ValidatedPath((id, user_id)): ValidatedPath<(Uuid, Uuid)>,
    ValidatedJson(req): ValidatedJson<UpdateDepartmentMemberRequest>,
) -> ApiResult<DepartmentMember> {
    let member = DepartmentService::new(state.pool)
        .update_member(&ctx, id, user_id, &req)
        .await?;
    Ok(ApiResponse::success(member))
}

pub async fn department_member_delete(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    ValidatedPath((id, user_id)): ValidatedPath<(Uuid, Uuid)>,
) -> ApiResult<()> {
    DepartmentService::new(state.pool).remove_member(&ctx, id, user_id).await?;
    Ok(ApiResponse::no_content())
}
