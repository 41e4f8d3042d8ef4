use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::{self, password::MIN_PASSWORD_LENGTH, AuthError, Claims};
use crate::config;
use crate::database::models::{Tenant, User};
use crate::services::rbac_service::AccessSummary;
use crate::services::{RbacService, ServiceError, TenantService};
use crate::validation::{is_valid_email, normalize_email, FieldErrors, Validate};

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub name: String,
    pub password: String,
}

impl Validate for RegisterRequest {
    fn validate(&self) -> Result<(), ServiceError> {
        let mut errors = FieldErrors::new();
        errors.check(is_valid_email(&self.email), "email", "Must be a valid email address");
        errors.required_text("name", &self.name, 200);
        check_password(&mut errors, &self.password);
        errors.into_result()
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    /// Slug of the tenant to scope the token to
    pub tenant: Option<String>,
}

impl Validate for LoginRequest {
    fn validate(&self) -> Result<(), ServiceError> {
        let mut errors = FieldErrors::new();
        errors.check(!self.email.trim().is_empty(), "email", "This field is required");
        errors.check(!self.password.is_empty(), "password", "This field is required");
        errors.into_result()
    }
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub token: String,
}

impl Validate for RefreshRequest {
    fn validate(&self) -> Result<(), ServiceError> {
        let mut errors = FieldErrors::new();
        errors.check(!self.token.trim().is_empty(), "token", "This field is required");
        errors.into_result()
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub password: Option<String>,
}

impl Validate for UpdateProfileRequest {
    fn validate(&self) -> Result<(), ServiceError> {
        let mut errors = FieldErrors::new();
        errors.optional_text("name", self.name.as_deref(), 200);
        if let Some(password) = &self.password {
            check_password(&mut errors, password);
        }
        errors.into_result()
    }
}

fn check_password(errors: &mut FieldErrors, password: &str) {
    errors.check(
        password.chars().count() >= MIN_PASSWORD_LENGTH,
        "password",
        "Password must be at least 8 characters",
    );
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    pub user: User,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant: Option<Tenant>,
}

#[derive(Debug, Serialize)]
pub struct WhoAmI {
    pub user: User,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access: Option<AccessSummary>,
}

pub struct UserService {
    pool: PgPool,
}

const USER_COLUMNS: &str = "id, email, name, password_hash, is_active, created_at, updated_at";

impl UserService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn register(&self, req: &RegisterRequest) -> Result<User, ServiceError> {
        if !config::config().security.allow_registration {
            return Err(ServiceError::Forbidden("Registration is disabled".to_string()));
        }
        self.create_user(req).await
    }

    /// Insert a user without consulting the registration switch; used by the
    /// operator bootstrap command.
    pub async fn create_user(&self, req: &RegisterRequest) -> Result<User, ServiceError> {
        let email = normalize_email(&req.email);
        let password_hash = auth::hash_password(&req.password)?;

        let sql = format!(
            r#"
            INSERT INTO users (id, email, name, password_hash)
            VALUES ($1, $2, $3, $4)
            RETURNING {}
            "#,
            USER_COLUMNS
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(Uuid::new_v4())
            .bind(&email)
            .bind(req.name.trim())
            .bind(&password_hash)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
                    ServiceError::Conflict(format!("An account for {} already exists", email))
                }
                _ => e.into(),
            })?;

        tracing::info!(user = %user.id, "User registered");
        Ok(user)
    }

    /// Check credentials and issue a token, tenant-scoped when a slug is given.
    /// Unknown users and wrong passwords are indistinguishable to the caller.
    pub async fn login(&self, req: &LoginRequest) -> Result<TokenResponse, ServiceError> {
        let email = normalize_email(&req.email);
        let user = self.find_by_email(&email).await?;

        let user = match user {
            Some(u) if u.is_active && auth::verify_password(&req.password, &u.password_hash)? => u,
            _ => {
                tracing::warn!("Login failed: invalid credentials");
                return Err(AuthError::InvalidCredentials.into());
            }
        };

        let tenant = match req.tenant.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(slug) => {
                let tenant = TenantService::new(self.pool.clone())
                    .find_by_slug(slug)
                    .await?
                    .filter(Tenant::is_usable)
                    .ok_or_else(|| ServiceError::Forbidden(format!("Tenant '{}' is not available", slug)))?;
                // Resolves membership and activity; the context itself is not needed here
                RbacService::new(self.pool.clone())
                    .load_access(tenant.id, user.id, &user.email)
                    .await?;
                Some(tenant)
            }
            None => None,
        };

        let claims = Claims::new(user.id, user.email.clone(), tenant.as_ref().map(|t| t.id));
        let token = auth::generate_jwt(&claims)?;
        tracing::info!(user = %user.id, tenant = ?tenant.as_ref().map(|t| &t.slug), "Login succeeded");

        Ok(TokenResponse {
            token,
            token_type: "Bearer",
            expires_in: claims.expires_in(),
            user,
            tenant,
        })
    }

    /// Exchange a recently expired (or still valid) token for a fresh one.
    pub async fn refresh(&self, req: &RefreshRequest) -> Result<TokenResponse, ServiceError> {
        let old = auth::validate_refreshable_jwt(req.token.trim())?;

        let user = self
            .find_by_id(old.sub)
            .await?
            .filter(|u| u.is_active)
            .ok_or_else(|| ServiceError::Unauthorized("User is no longer active".to_string()))?;

        let tenant = match old.tenant_id {
            Some(tenant_id) => {
                let ctx = RbacService::new(self.pool.clone())
                    .load_access(tenant_id, user.id, &user.email)
                    .await?;
                Some(ctx.tenant)
            }
            None => None,
        };

        let claims = Claims::new(user.id, user.email.clone(), old.tenant_id);
        let token = auth::generate_jwt(&claims)?;

        Ok(TokenResponse {
            token,
            token_type: "Bearer",
            expires_in: claims.expires_in(),
            user,
            tenant,
        })
    }

    pub async fn whoami(&self, user_id: Uuid, tenant_id: Option<Uuid>) -> Result<WhoAmI, ServiceError> {
        let user = self
            .find_by_id(user_id)
            .await?
            .filter(|u| u.is_active)
            .ok_or_else(|| ServiceError::Unauthorized("User is no longer active".to_string()))?;

        let access = match tenant_id {
            Some(tenant_id) => {
                let rbac = RbacService::new(self.pool.clone());
                let ctx = rbac.load_access(tenant_id, user.id, &user.email).await?;
                Some(rbac.summarize(&ctx).await?)
            }
            None => None,
        };

        Ok(WhoAmI { user, access })
    }

    pub async fn update_profile(&self, user_id: Uuid, req: &UpdateProfileRequest) -> Result<User, ServiceError> {
        let password_hash = match &req.password {
            Some(p) => Some(auth::hash_password(p)?),
            None => None,
        };

        let sql = format!(
            r#"
            UPDATE users
            SET name = COALESCE($2, name),
                password_hash = COALESCE($3, password_hash),
                updated_at = now()
            WHERE id = $1 AND is_active
            RETURNING {}
            "#,
            USER_COLUMNS
        );
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(user_id)
            .bind(req.name.as_deref().map(str::trim))
            .bind(password_hash)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ServiceError::not_found("User"))?;

        if req.password.is_some() {
            tracing::info!(user = %user.id, "Password changed");
        }
        Ok(user)
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>, ServiceError> {
        let sql = format!("SELECT {} FROM users WHERE lower(email) = $1", USER_COLUMNS);
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(normalize_email(email))
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }

    pub async fn find_by_id(&self, user_id: Uuid) -> Result<Option<User>, ServiceError> {
        let sql = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);
        let user = sqlx::query_as::<_, User>(&sql)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(user)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_validation_reports_each_field() {
        let req = RegisterRequest {
            email: "no-at-sign".into(),
            name: " ".into(),
            password: "short".into(),
        };
        match req.validate() {
            Err(ServiceError::Validation(errors)) => {
                assert!(errors.get("email").is_some());
                assert!(errors.get("name").is_some());
                assert!(errors.get("password").is_some());
            }
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn accepts_valid_registration() {
        let req = RegisterRequest {
            email: "Stage.Manager@Acme.test".into(),
            name: "Stage Manager".into(),
            password: "correct horse".into(),
        };
        assert!(req.validate().is_ok());
    }

    #[test]
    fn profile_update_checks_optional_password() {
        let req = UpdateProfileRequest {
            name: None,
            password: Some("1234567".into()),
        };
        assert!(req.validate().is_err());
        let req = UpdateProfileRequest {
            name: Some("Renamed".into()),
            password: None,
        };
        assert!(req.validate().is_ok());
    }

    #[test]
    fn login_and_refresh_require_fields() {
        let login = LoginRequest {
            email: "".into(),
            password: "".into(),
            tenant: None,
        };
        assert!(login.validate().is_err());
        let refresh = RefreshRequest { token: "  ".into() };
        assert!(refresh.validate().is_err());
    }
}
