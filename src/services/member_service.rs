use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::models::MemberDetail;
use crate::services::department_service::ensure_not_sole_admin;
use crate::services::{AccessContext, RbacService, ServiceError};
use crate::validation::{is_valid_email, normalize_email, FieldErrors, Validate};

#[derive(Debug, Deserialize)]
pub struct AddMemberRequest {
    pub email: String,
    pub role_id: Option<Uuid>,
}

impl Validate for AddMemberRequest {
    fn validate(&self) -> Result<(), ServiceError> {
        let mut errors = FieldErrors::new();
        errors.check(is_valid_email(&self.email), "email", "Must be a valid email address");
        errors.into_result()
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateMemberRequest {
    pub role_id: Option<Uuid>,
    pub is_active: Option<bool>,
}

impl Validate for UpdateMemberRequest {
    fn validate(&self) -> Result<(), ServiceError> {
        let mut errors = FieldErrors::new();
        errors.check(
            self.role_id.is_some() || self.is_active.is_some(),
            "role_id",
            "Provide role_id or is_active",
        );
        errors.into_result()
    }
}

pub struct MemberService {
    pool: PgPool,
}

const MEMBER_SELECT: &str = r#"
    SELECT m.user_id, u.email, u.name, m.role_id, r.name AS role_name,
           m.is_owner, m.is_active, m.joined_at
    FROM tenant_memberships m
    JOIN users u ON u.id = m.user_id
    LEFT JOIN roles r ON r.id = m.role_id
"#;

impl MemberService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn list(&self, ctx: &AccessContext) -> Result<Vec<MemberDetail>, ServiceError> {
        ctx.require("members.read")?;

        let sql = format!("{} WHERE m.tenant_id = $1 ORDER BY u.email", MEMBER_SELECT);
        let members = sqlx::query_as::<_, MemberDetail>(&sql)
            .bind(ctx.tenant_id())
            .fetch_all(&self.pool)
            .await?;
        Ok(members)
    }

    pub async fn get(&self, ctx: &AccessContext, user_id: Uuid) -> Result<MemberDetail, ServiceError> {
        let sql = format!("{} WHERE m.tenant_id = $1 AND m.user_id = $2", MEMBER_SELECT);
        sqlx::query_as::<_, MemberDetail>(&sql)
            .bind(ctx.tenant_id())
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ServiceError::not_found("Member"))
    }

    /// Add an existing user by email. A deactivated membership is reactivated.
    pub async fn add(&self, ctx: &AccessContext, req: &AddMemberRequest) -> Result<MemberDetail, ServiceError> {
        ctx.require("members.manage")?;

        let email = normalize_email(&req.email);
        let user_id: Uuid = sqlx::query_scalar("SELECT id FROM users WHERE lower(email) = $1 AND is_active")
            .bind(&email)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ServiceError::not_found("User"))?;

        let role_id = self.resolve_role(ctx, req.role_id).await?;

        let existing: Option<bool> = sqlx::query_scalar(
            "SELECT is_active FROM tenant_memberships WHERE tenant_id = $1 AND user_id = $2",
        )
        .bind(ctx.tenant_id())
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        match existing {
            Some(true) => {
                return Err(ServiceError::Conflict(format!("{} is already a member", email)));
            }
            Some(false) => {
                sqlx::query(
                    r#"
                    UPDATE tenant_memberships
                    SET is_active = TRUE, role_id = $3
                    WHERE tenant_id = $1 AND user_id = $2
                    "#,
                )
                .bind(ctx.tenant_id())
                .bind(user_id)
                .bind(role_id)
                .execute(&self.pool)
                .await?;
            }
            None => {
                sqlx::query(
                    r#"
                    INSERT INTO tenant_memberships (id, tenant_id, user_id, role_id, is_owner, is_active)
                    VALUES ($1, $2, $3, $4, FALSE, TRUE)
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(ctx.tenant_id())
                .bind(user_id)
                .bind(role_id)
                .execute(&self.pool)
                .await?;
            }
        }

        tracing::info!(tenant = %ctx.tenant.slug, %user_id, "Member added");
        self.get(ctx, user_id).await
    }

    pub async fn update(
        &self,
        ctx: &AccessContext,
        user_id: Uuid,
        req: &UpdateMemberRequest,
    ) -> Result<MemberDetail, ServiceError> {
        ctx.require("members.manage")?;
        let member = self.get(ctx, user_id).await?;

        if member.is_owner {
            return Err(ServiceError::Forbidden("The tenant owner cannot be demoted or deactivated".to_string()));
        }

        let role_id = match req.role_id {
            Some(id) => Some(self.resolve_role(ctx, Some(id)).await?),
            None => None,
        };

        let deactivating = req.is_active == Some(false);
        let mut tx = self.pool.begin().await?;
        if deactivating {
            ensure_not_sole_admin(&mut tx, ctx.tenant_id(), user_id).await?;
        }
        sqlx::query(
            r#"
            UPDATE tenant_memberships
            SET role_id = COALESCE($3, role_id),
                is_active = COALESCE($4, is_active)
            WHERE tenant_id = $1 AND user_id = $2
            "#,
        )
        .bind(ctx.tenant_id())
        .bind(user_id)
        .bind(role_id)
        .bind(req.is_active)
        .execute(&mut *tx)
        .await?;

        if deactivating {
            remove_department_memberships(&mut tx, ctx.tenant_id(), user_id).await?;
        }
        tx.commit().await?;

        self.get(ctx, user_id).await
    }

    /// Remove a member from the tenant together with their department
    /// memberships. Refused while they are the only admin of a department.
    pub async fn remove(&self, ctx: &AccessContext, user_id: Uuid) -> Result<(), ServiceError> {
        ctx.require("members.manage")?;
        let member = self.get(ctx, user_id).await?;

        if member.is_owner {
            return Err(ServiceError::Forbidden("The tenant owner cannot be removed".to_string()));
        }

        let mut tx = self.pool.begin().await?;
        ensure_not_sole_admin(&mut tx, ctx.tenant_id(), user_id).await?;
        remove_department_memberships(&mut tx, ctx.tenant_id(), user_id).await?;
        sqlx::query("DELETE FROM tenant_memberships WHERE tenant_id = $1 AND user_id = $2")
            .bind(ctx.tenant_id())
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(tenant = %ctx.tenant.slug, %user_id, "Member removed");
        Ok(())
    }

    /// Explicit role, or the tenant's default member role when none is given.
    async fn resolve_role(&self, ctx: &AccessContext, role_id: Option<Uuid>) -> Result<Option<Uuid>, ServiceError> {
        match role_id {
            Some(id) => {
                let rbac = RbacService::new(self.pool.clone());
                match rbac.find_role(ctx.tenant_id(), id).await {
                    Ok(role) => Ok(Some(role.id)),
                    Err(ServiceError::NotFound(_)) => {
                        let mut errors = FieldErrors::new();
                        errors.add("role_id", "Role does not exist in this tenant");
                        Err(ServiceError::Validation(errors))
                    }
                    Err(e) => Err(e),
                }
            }
            None => {
                let id: Option<Uuid> = sqlx::query_scalar("SELECT id FROM roles WHERE tenant_id = $1 AND name = $2")
                    .bind(ctx.tenant_id())
                    .bind(crate::services::rbac_service::MEMBER_ROLE)
                    .fetch_optional(&self.pool)
                    .await?;
                Ok(id)
            }
        }
    }
}

async fn remove_department_memberships(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    tenant_id: Uuid,
    user_id: Uuid,
) -> Result<(), ServiceError> {
    sqlx::query(
        r#"
        DELETE FROM department_members dm
        USING departments d
        WHERE dm.department_id = d.id AND d.tenant_id = $1 AND dm.user_id = $2
        "#,
    )
    .bind(tenant_id)
    .bind(user_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_member_requires_valid_email() {
        let bad = AddMemberRequest {
            email: "nobody".into(),
            role_id: None,
        };
        assert!(matches!(bad.validate(), Err(ServiceError::Validation(e)) if e.get("email").is_some()));

        let good = AddMemberRequest {
            email: "crew@acme.test".into(),
            role_id: None,
        };
        assert!(good.validate().is_ok());
    }

    #[test]
    fn update_member_needs_a_change() {
        let empty = UpdateMemberRequest {
            role_id: None,
            is_active: None,
        };
        assert!(empty.validate().is_err());
        let deactivate = UpdateMemberRequest {
            role_id: None,
            is_active: Some(false),
        };
        assert!(deactivate.validate().is_ok());
    }
}
