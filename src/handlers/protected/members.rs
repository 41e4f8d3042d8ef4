// handlers/protected/members.rs - /api/members

use axum::{extract::State, Extension};
use uuid::Uuid;

use crate::app::AppState;
use crate::database::models::MemberDetail;
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::member_service::{AddMemberRequest, UpdateMemberRequest};
use crate::services::{AccessContext, MemberService};
use crate::validation::{ValidatedJson, ValidatedPath};

pub async fn members_get(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
) -> ApiResult<Vec<MemberDetail>> {
    let members = MemberService::new(state.pool).list(&ctx).await?;
    Ok(ApiResponse::success(members))
}

/// POST /api/members - add an existing user by email
pub async fn members_post(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    ValidatedJson(req): ValidatedJson<AddMemberRequest>,
) -> ApiResult<MemberDetail> {
    let member = MemberService::new(state.pool).add(&ctx, &req).await?;
    Ok(ApiResponse::created(member))
}

pub async fn member_patch(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    ValidatedPath(user_id): ValidatedPath<Uuid>,
    ValidatedJson(req): ValidatedJson<UpdateMemberRequest>,
) -> ApiResult<MemberDetail> {
    let member = MemberService::new(state.pool).update(&ctx, user_id, &req).await?;
    Ok(ApiResponse::success(member))
}

pub async fn member_delete(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    ValidatedPath(user_id): ValidatedPath<Uuid>,
) -> ApiResult<()> {
    MemberService::new(state.pool).remove(&ctx, user_id).await?;
    Ok(ApiResponse::no_content())
}
