// handlers/protected/auth.rs - GET /api/auth/whoami, PATCH /api/auth/profile

use axum::{extract::State, Extension};

use crate::app::AppState;
use crate::database::models::User;
use crate::middleware::{ApiResponse, ApiResult, AuthUser};
use crate::services::user_service::{UpdateProfileRequest, WhoAmI};
use crate::services::UserService;
use crate::validation::ValidatedJson;

/// GET /api/auth/whoami - profile, plus role and effective permissions on tenant tokens
pub async fn whoami_get(State(state): State<AppState>, Extension(auth): Extension<AuthUser>) -> ApiResult<WhoAmI> {
    let who = UserService::new(state.pool).whoami(auth.user_id, auth.tenant_id).await?;
    Ok(ApiResponse::success(who))
}

pub async fn profile_patch(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
    ValidatedJson(req): ValidatedJson<UpdateProfileRequest>,
) -> ApiResult<User> {
    let user = UserService::new(state.pool).update_profile(auth.user_id, &req).await?;
    Ok(ApiResponse::success(user))
}
