use axum::{
    extract::Request,
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::auth::{self, AuthError, Claims};
use crate::error::ApiError;

/// Authenticated caller extracted from the bearer token
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub email: String,
    /// Set when the token is scoped to a tenant
    pub tenant_id: Option<Uuid>,
}

impl From<Claims> for AuthUser {
    fn from(claims: Claims) -> Self {
        Self {
            user_id: claims.sub,
            email: claims.email,
            tenant_id: claims.tenant_id,
        }
    }
}

/// Validates the bearer token and injects [`AuthUser`] into request extensions.
pub async fn jwt_auth_middleware(mut request: Request, next: Next) -> Result<Response, ApiError> {
    let token = extract_jwt_from_headers(request.headers()).map_err(ApiError::unauthorized)?;

    let claims = auth::validate_jwt(&token).map_err(|e| {
        tracing::debug!(error = %e, "Rejected bearer token");
        match e {
            AuthError::InvalidSecret => ApiError::from(e),
            other => ApiError::unauthorized(other.to_string()),
        }
    })?;

    request.extensions_mut().insert(AuthUser::from(claims));
    Ok(next.run(request).await)
}

/// Extract JWT token from Authorization header
fn extract_jwt_from_headers(headers: &HeaderMap) -> Result<String, String> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .ok_or_else(|| "Missing Authorization header".to_string())?;

    let auth_str = auth_header
        .to_str()
        .map_err(|_| "Invalid Authorization header format".to_string())?;

    match auth_str.strip_prefix("Bearer ") {
        Some(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
        Some(_) => Err("Empty JWT token".to_string()),
        None => Err("Authorization header must use Bearer token format".to_string()),
    }
}
