pub mod password;

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::{self, SecurityConfig};

pub use password::{hash_password, verify_password};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// User id
    pub sub: Uuid,
    pub email: String,
    /// Present on tenant-scoped tokens only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<Uuid>,
    pub iss: String,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    pub fn new(user_id: Uuid, email: String, tenant_id: Option<Uuid>) -> Self {
        Self::with_security(&config::config().security, user_id, email, tenant_id)
    }

    pub fn with_security(
        security: &SecurityConfig,
        user_id: Uuid,
        email: String,
        tenant_id: Option<Uuid>,
    ) -> Self {
        let now = Utc::now();
        let exp = (now + Duration::hours(security.jwt_expiry_hours as i64)).timestamp();

        Self {
            sub: user_id,
            email,
            tenant_id,
            iss: security.jwt_issuer.clone(),
            exp,
            iat: now.timestamp(),
        }
    }

    pub fn expires_in(&self) -> i64 {
        (self.exp - Utc::now().timestamp()).max(0)
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("JWT generation error: {0}")]
    TokenGeneration(String),

    #[error("JWT secret not configured")]
    InvalidSecret,

    #[error("Token has expired")]
    Expired,

    #[error("Token is past its refresh window")]
    RefreshWindowElapsed,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Password hashing failed: {0}")]
    PasswordHash(String),
}

pub fn generate_jwt(claims: &Claims) -> Result<String, AuthError> {
    generate_jwt_with(&config::config().security, claims)
}

pub fn generate_jwt_with(security: &SecurityConfig, claims: &Claims) -> Result<String, AuthError> {
    if security.jwt_secret.is_empty() {
        return Err(AuthError::InvalidSecret);
    }

    let encoding_key = EncodingKey::from_secret(security.jwt_secret.as_bytes());
    encode(&Header::default(), claims, &encoding_key).map_err(|e| AuthError::TokenGeneration(e.to_string()))
}

/// Validate signature, issuer and expiry.
pub fn validate_jwt(token: &str) -> Result<Claims, AuthError> {
    decode_jwt(&config::config().security, token, false)
}

/// Validate a token for refresh: the signature must hold, and an expired token
/// is accepted only within `refresh_window_hours` of its expiry.
pub fn validate_refreshable_jwt(token: &str) -> Result<Claims, AuthError> {
    validate_refreshable_jwt_with(&config::config().security, token)
}

pub fn validate_refreshable_jwt_with(security: &SecurityConfig, token: &str) -> Result<Claims, AuthError> {
    let claims = decode_jwt(security, token, true)?;
    let window = Duration::hours(security.refresh_window_hours as i64).num_seconds();
    if Utc::now().timestamp() > claims.exp + window {
        return Err(AuthError::RefreshWindowElapsed);
    }
    Ok(claims)
}

pub fn decode_jwt(security: &SecurityConfig, token: &str, allow_expired: bool) -> Result<Claims, AuthError> {
    if security.jwt_secret.is_empty() {
        return Err(AuthError::InvalidSecret);
    }

    let decoding_key = DecodingKey::from_secret(security.jwt_secret.as_bytes());
    let mut validation = Validation::default();
    validation.validate_exp = !allow_expired;
    validation.leeway = 0;
    validation.set_issuer(&[security.jwt_issuer.as_str()]);

    decode::<Claims>(token, &decoding_key, &validation)
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => AuthError::Expired,
            _ => AuthError::InvalidToken(e.to_string()),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn security() -> SecurityConfig {
        SecurityConfig {
            jwt_secret: "test-secret".to_string(),
            jwt_issuer: "eventdesk".to_string(),
            jwt_expiry_hours: 1,
            refresh_window_hours: 24,
            enable_cors: false,
            cors_origins: vec![],
            allow_registration: true,
        }
    }

    fn expired_claims(hours_ago: i64) -> Claims {
        let now = Utc::now();
        Claims {
            sub: Uuid::new_v4(),
            email: "ops@example.com".to_string(),
            tenant_id: None,
            iss: "eventdesk".to_string(),
            exp: (now - Duration::hours(hours_ago)).timestamp(),
            iat: (now - Duration::hours(hours_ago + 1)).timestamp(),
        }
    }

    #[test]
    fn issues_and_validates_tenant_token() {
        let sec = security();
        let tenant = Uuid::new_v4();
        let claims = Claims::with_security(&sec, Uuid::new_v4(), "ops@example.com".into(), Some(tenant));
        let token = generate_jwt_with(&sec, &claims).unwrap();
        let decoded = decode_jwt(&sec, &token, false).unwrap();
        assert_eq!(decoded, claims);
        assert_eq!(decoded.tenant_id, Some(tenant));
        assert!(decoded.expires_in() > 0);
    }

    #[test]
    fn rejects_wrong_secret_and_issuer() {
        let sec = security();
        let claims = Claims::with_security(&sec, Uuid::new_v4(), "ops@example.com".into(), None);
        let token = generate_jwt_with(&sec, &claims).unwrap();

        let mut other = security();
        other.jwt_secret = "another-secret".into();
        assert!(matches!(decode_jwt(&other, &token, false), Err(AuthError::InvalidToken(_))));

        let mut other = security();
        other.jwt_issuer = "someone-else".into();
        assert!(matches!(decode_jwt(&other, &token, false), Err(AuthError::InvalidToken(_))));
    }

    #[test]
    fn expired_token_refreshable_within_window() {
        let sec = security();
        let token = generate_jwt_with(&sec, &expired_claims(2)).unwrap();
        assert!(matches!(decode_jwt(&sec, &token, false), Err(AuthError::Expired)));
        assert!(validate_refreshable_jwt_with(&sec, &token).is_ok());

        let stale = generate_jwt_with(&sec, &expired_claims(48)).unwrap();
        assert!(matches!(
            validate_refreshable_jwt_with(&sec, &stale),
            Err(AuthError::RefreshWindowElapsed)
        ));
    }

    #[test]
    fn empty_secret_refuses_to_sign() {
        let mut sec = security();
        sec.jwt_secret.clear();
        let claims = Claims::with_security(&sec, Uuid::new_v4(), "ops@example.com".into(), None);
        assert!(matches!(generate_jwt_with(&sec, &claims), Err(AuthError::InvalidSecret)));
    }
}
