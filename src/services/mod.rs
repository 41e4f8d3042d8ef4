pub mod attachment_service;
pub mod chat_service;
pub mod department_service;
pub mod event_service;
pub mod feedback_service;
pub mod member_service;
pub mod rbac_service;
pub mod task_service;
pub mod tenant_service;
pub mod user_service;
pub mod venue_service;

pub use attachment_service::AttachmentService;
pub use chat_service::ChatService;
pub use department_service::DepartmentService;
pub use event_service::EventService;
pub use feedback_service::FeedbackService;
pub use member_service::MemberService;
pub use rbac_service::{AccessContext, RbacService};
pub use task_service::TaskService;
pub use tenant_service::TenantService;
pub use user_service::UserService;
pub use venue_service::VenueService;

use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::auth::AuthError;
use crate::database::manager::DatabaseError;
use crate::filter::FilterError;
use crate::storage::StorageError;
use crate::validation::FieldErrors;

/// Domain-level failures; converted to `ApiError` at the HTTP boundary
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error("{0}")]
    Unprocessable(String),

    #[error("Validation failed")]
    Validation(FieldErrors),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Filter(#[from] FilterError),
}

impl From<sqlx::Error> for ServiceError {
    fn from(err: sqlx::Error) -> Self {
        ServiceError::Database(DatabaseError::Sqlx(err))
    }
}

impl ServiceError {
    pub fn not_found(what: &str) -> Self {
        ServiceError::NotFound(format!("{} not found", what))
    }
}

/// Fails unless `user_id` is an active member of `tenant_id`.
pub(crate) async fn ensure_active_member(
    pool: &PgPool,
    tenant_id: Uuid,
    user_id: Uuid,
    field: &str,
) -> Result<(), ServiceError> {
    let active: Option<bool> = sqlx::query_scalar(
        r#"
        SELECT m.is_active AND u.is_active
        FROM tenant_memberships m
        JOIN users u ON u.id = m.user_id
        WHERE m.tenant_id = $1 AND m.user_id = $2
        "#,
    )
    .bind(tenant_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    match active {
        Some(true) => Ok(()),
        _ => {
            let mut errors = FieldErrors::new();
            errors.add(field, "User is not an active member of this tenant");
            Err(ServiceError::Validation(errors))
        }
    }
}
