// handlers/public/auth.rs - POST /auth/register, /auth/login, /auth/refresh

use axum::extract::State;

use crate::app::AppState;
use crate::database::models::User;
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::user_service::{LoginRequest, RefreshRequest, RegisterRequest, TokenResponse};
use crate::services::UserService;
use crate::validation::ValidatedJson;

/// POST /auth/register - create an account (no tenant yet)
pub async fn register_post(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RegisterRequest>,
) -> ApiResult<User> {
    let user = UserService::new(state.pool).register(&req).await?;
    Ok(ApiResponse::created(user))
}

/// POST /auth/login - exchange credentials for a token; `tenant` scopes it
pub async fn login_post(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> ApiResult<TokenResponse> {
    let token = UserService::new(state.pool).login(&req).await?;
    Ok(ApiResponse::success(token))
}

/// POST /auth/refresh - reissue a token that expired within the refresh window
pub async fn refresh_post(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RefreshRequest>,
) -> ApiResult<TokenResponse> {
    let token = UserService::new(state.pool).refresh(&req).await?;
    Ok(ApiResponse::success(token))
}
