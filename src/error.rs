// HTTP API Error Types
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::auth::AuthError;
use crate::database::manager::DatabaseError;
use crate::filter::error::FilterError;
use crate::services::ServiceError;
use crate::storage::StorageError;

/// HTTP API error with appropriate status codes and client-friendly messages
#[derive(Debug)]
pub enum ApiError {
    // 400 Bad Request
    BadRequest(String),
    ValidationError {
        message: String,
        field_errors: Option<HashMap<String, String>>,
    },
    InvalidJson(String),

    // 401 Unauthorized
    Unauthorized(String),

    // 403 Forbidden
    Forbidden(String),

    // 404 Not Found
    NotFound(String),

    // 409 Conflict
    Conflict(String),

    // 413 Payload Too Large
    PayloadTooLarge(String),

    // 422 Unprocessable Entity (validation but semantically valid JSON)
    UnprocessableEntity {
        message: String,
        field_errors: HashMap<String, String>,
    },

    // 500 Internal Server Error
    InternalServerError(String),

    // 503 Service Unavailable
    ServiceUnavailable(String),
}

impl ApiError {
    /// Get HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::BadRequest(_) => 400,
            ApiError::ValidationError { .. } => 400,
            ApiError::InvalidJson(_) => 400,
            ApiError::Unauthorized(_) => 401,
            ApiError::Forbidden(_) => 403,
            ApiError::NotFound(_) => 404,
            ApiError::Conflict(_) => 409,
            ApiError::PayloadTooLarge(_) => 413,
            ApiError::UnprocessableEntity { .. } => 422,
            ApiError::InternalServerError(_) => 500,
            ApiError::ServiceUnavailable(_) => 503,
        }
    }

    /// Get client-safe error message
    pub fn message(&self) -> &str {
        match self {
            ApiError::BadRequest(msg) => msg,
            ApiError::ValidationError { message, .. } => message,
            ApiError::InvalidJson(msg) => msg,
            ApiError::Unauthorized(msg) => msg,
            ApiError::Forbidden(msg) => msg,
            ApiError::NotFound(msg) => msg,
            ApiError::Conflict(msg) => msg,
            ApiError::PayloadTooLarge(msg) => msg,
            ApiError::UnprocessableEntity { message, .. } => message,
            ApiError::InternalServerError(msg) => msg,
            ApiError::ServiceUnavailable(msg) => msg,
        }
    }

    /// Convert to JSON response body
    pub fn to_json(&self) -> Value {
        let mut response = json!({
            "success": false,
            "error": self.message(),
            "code": self.error_code()
        });

        match self {
            ApiError::ValidationError { field_errors: Some(field_errors), .. } => {
                response["field_errors"] = json!(field_errors);
            }
            ApiError::UnprocessableEntity { field_errors, .. } if !field_errors.is_empty() => {
                response["field_errors"] = json!(field_errors);
            }
            _ => {}
        }

        response
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::ValidationError { .. } => "VALIDATION_ERROR",
            ApiError::InvalidJson(_) => "INVALID_JSON",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            ApiError::UnprocessableEntity { .. } => "UNPROCESSABLE_ENTITY",
            ApiError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
            ApiError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
        }
    }
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn validation_error(
        message: impl Into<String>,
        field_errors: Option<HashMap<String, String>>,
    ) -> Self {
        ApiError::ValidationError {
            message: message.into(),
            field_errors,
        }
    }

    pub fn invalid_json(message: impl Into<String>) -> Self {
        ApiError::InvalidJson(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::Unauthorized(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ApiError::Conflict(message.into())
    }

    pub fn payload_too_large(message: impl Into<String>) -> Self {
        ApiError::PayloadTooLarge(message.into())
    }

    pub fn unprocessable_entity(message: impl Into<String>) -> Self {
        ApiError::UnprocessableEntity {
            message: message.into(),
            field_errors: HashMap::new(),
        }
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        ApiError::InternalServerError(message.into())
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        ApiError::ServiceUnavailable(message.into())
    }
}

impl From<DatabaseError> for ApiError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::ConfigMissing(_) | DatabaseError::InvalidDatabaseUrl => {
                tracing::error!("Database misconfigured: {}", err);
                ApiError::service_unavailable("Database temporarily unavailable")
            }
            DatabaseError::Migration(e) => {
                tracing::error!("Migration error: {}", e);
                ApiError::service_unavailable("Service is being updated, please try again later")
            }
            DatabaseError::Sqlx(sqlx::Error::RowNotFound) => ApiError::not_found("Record not found"),
            DatabaseError::Sqlx(sqlx::Error::Database(db_err)) => match db_err.code().as_deref() {
                // unique_violation
                Some("23505") => ApiError::conflict("A record with the same unique value already exists"),
                // foreign_key_violation
                Some("23503") => ApiError::unprocessable_entity("Referenced record does not exist"),
                // check_violation
                Some("23514") => ApiError::unprocessable_entity("Value violates a database constraint"),
                _ => {
                    // Don't expose internal SQL errors to clients
                    tracing::error!("Database query error: {}", db_err);
                    ApiError::internal_server_error("An error occurred while processing your request")
                }
            },
            DatabaseError::Sqlx(sqlx::Error::PoolTimedOut)
            | DatabaseError::Sqlx(sqlx::Error::Io(_))
            | DatabaseError::Sqlx(sqlx::Error::PoolClosed) => {
                tracing::error!("Database connection error: {}", err);
                ApiError::service_unavailable("Database temporarily unavailable")
            }
            DatabaseError::Sqlx(sqlx_err) => {
                tracing::error!("SQLx error: {}", sqlx_err);
                ApiError::internal_server_error("Database error occurred")
            }
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        DatabaseError::Sqlx(err).into()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidSecret | AuthError::TokenGeneration(_) | AuthError::PasswordHash(_) => {
                tracing::error!("Auth subsystem error: {}", err);
                ApiError::internal_server_error("Authentication subsystem error")
            }
            other => ApiError::unauthorized(other.to_string()),
        }
    }
}

impl From<StorageError> for ApiError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::InvalidPath(path) => ApiError::bad_request(format!("Invalid storage path: {}", path)),
            StorageError::NotFound(_) => ApiError::not_found("Attachment content is missing"),
            other => {
                tracing::error!("Storage error: {}", other);
                ApiError::internal_server_error("Attachment storage error")
            }
        }
    }
}

impl From<FilterError> for ApiError {
    fn from(err: FilterError) -> Self {
        ApiError::bad_request(err.to_string())
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::NotFound(msg) => ApiError::not_found(msg),
            ServiceError::Conflict(msg) => ApiError::conflict(msg),
            ServiceError::Forbidden(msg) => ApiError::forbidden(msg),
            ServiceError::Unauthorized(msg) => ApiError::unauthorized(msg),
            ServiceError::BadRequest(msg) => ApiError::bad_request(msg),
            ServiceError::PayloadTooLarge(msg) => ApiError::payload_too_large(msg),
            ServiceError::Unprocessable(msg) => ApiError::unprocessable_entity(msg),
            ServiceError::Validation(errors) => {
                ApiError::validation_error("Validation failed", Some(errors.into_inner()))
            }
            ServiceError::Database(e) => e.into(),
            ServiceError::Storage(e) => e.into(),
            ServiceError::Auth(e) => e.into(),
            ServiceError::Filter(e) => e.into(),
        }
    }
}

// Standard error trait implementations
impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ApiError {}

// Automatic HTTP response conversion for Axum
impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_json())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::FieldErrors;

    #[test]
    fn error_body_uses_failure_envelope() {
        let body = ApiError::not_found("Event not found").to_json();
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Event not found");
        assert_eq!(body["code"], "NOT_FOUND");
        assert!(body.get("field_errors").is_none());
    }

    #[test]
    fn validation_errors_carry_fields() {
        let mut errors = FieldErrors::new();
        errors.add("name", "This field is required");
        let api: ApiError = ServiceError::Validation(errors).into();
        assert_eq!(api.status_code(), 400);
        let body = api.to_json();
        assert_eq!(body["field_errors"]["name"], "This field is required");
    }

    #[test]
    fn row_not_found_maps_to_404() {
        let api: ApiError = sqlx::Error::RowNotFound.into();
        assert_eq!(api.status_code(), 404);
    }

    #[test]
    fn pool_timeout_maps_to_503() {
        let api: ApiError = ServiceError::Database(DatabaseError::Sqlx(sqlx::Error::PoolTimedOut)).into();
        assert_eq!(api.status_code(), 503);
    }

    #[test]
    fn expired_token_is_unauthorized() {
        let api: ApiError = AuthError::Expired.into();
        assert_eq!(api.status_code(), 401);
        let api: ApiError = AuthError::InvalidSecret.into();
        assert_eq!(api.status_code(), 500);
    }

    #[test]
    fn service_errors_keep_their_status() {
        let cases: Vec<(ServiceError, u16)> = vec![
            (ServiceError::Forbidden("no".into()), 403),
            (ServiceError::Conflict("dup".into()), 409),
            (ServiceError::PayloadTooLarge("big".into()), 413),
            (ServiceError::Unprocessable("bad transition".into()), 422),
            (ServiceError::BadRequest("empty".into()), 400),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status_code(), status);
        }
    }
}
