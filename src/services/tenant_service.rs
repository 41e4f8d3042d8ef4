use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::models::{Tenant, TenantMembershipSummary};
use crate::services::{rbac_service, AccessContext, ServiceError};
use crate::validation::{is_valid_slug, slugify, FieldErrors, Validate};

#[derive(Debug, Deserialize)]
pub struct CreateTenantRequest {
    pub name: String,
    pub slug: Option<String>,
}

impl CreateTenantRequest {
    /// Explicit slug, or one derived from the name.
    pub fn resolved_slug(&self) -> String {
        match self.slug.as_deref().map(str::trim) {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => slugify(&self.name),
        }
    }
}

impl Validate for CreateTenantRequest {
    fn validate(&self) -> Result<(), ServiceError> {
        let mut errors = FieldErrors::new();
        errors.required_text("name", &self.name, 200);
        errors.check(
            is_valid_slug(&self.resolved_slug()),
            "slug",
            "Slug must be 2-63 lowercase letters, digits or single hyphens",
        );
        errors.into_result()
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateTenantRequest {
    pub name: Option<String>,
    pub is_active: Option<bool>,
}

impl Validate for UpdateTenantRequest {
    fn validate(&self) -> Result<(), ServiceError> {
        let mut errors = FieldErrors::new();
        errors.optional_text("name", self.name.as_deref(), 200);
        errors.into_result()
    }
}

pub struct TenantService {
    pool: PgPool,
}

impl TenantService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Provision a tenant: the row, every module enabled, the default roles and
    /// the creator's owner membership, all in one transaction.
    pub async fn create(&self, owner_id: Uuid, req: &CreateTenantRequest) -> Result<Tenant, ServiceError> {
        let slug = req.resolved_slug();
        let mut tx = self.pool.begin().await?;

        let tenant = sqlx::query_as::<_, Tenant>(
            r#"
            INSERT INTO tenants (id, name, slug)
            VALUES ($1, $2, $3)
            RETURNING id, name, slug, is_active, created_at, updated_at, deleted_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(req.name.trim())
        .bind(&slug)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => {
                ServiceError::Conflict(format!("Tenant slug '{}' is already taken", slug))
            }
            _ => e.into(),
        })?;

        sqlx::query(
            r#"
            INSERT INTO tenant_modules (tenant_id, module_id, enabled)
            SELECT $1, id, TRUE FROM modules
            "#,
        )
        .bind(tenant.id)
        .execute(&mut *tx)
        .await?;

        let admin_role = rbac_service::seed_default_roles(&mut tx, tenant.id).await?;

        sqlx::query(
            r#"
            INSERT INTO tenant_memberships (id, tenant_id, user_id, role_id, is_owner, is_active)
            VALUES ($1, $2, $3, $4, TRUE, TRUE)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant.id)
        .bind(owner_id)
        .bind(admin_role)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(tenant = %tenant.slug, owner = %owner_id, "Tenant provisioned");
        Ok(tenant)
    }

    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<TenantMembershipSummary>, ServiceError> {
        let tenants = sqlx::query_as::<_, TenantMembershipSummary>(
            r#"
            SELECT t.id, t.name, t.slug, m.is_owner, r.name AS role_name, m.joined_at
            FROM tenant_memberships m
            JOIN tenants t ON t.id = m.tenant_id
            LEFT JOIN roles r ON r.id = m.role_id
            WHERE m.user_id = $1
              AND m.is_active
              AND t.is_active
              AND t.deleted_at IS NULL
            ORDER BY t.name
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(tenants)
    }

    /// Active, non-deleted tenant by slug.
    pub async fn find_by_slug(&self, slug: &str) -> Result<Option<Tenant>, ServiceError> {
        let tenant = sqlx::query_as::<_, Tenant>(
            r#"
            SELECT id, name, slug, is_active, created_at, updated_at, deleted_at
            FROM tenants
            WHERE slug = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;
        Ok(tenant)
    }

    pub fn current(&self, ctx: &AccessContext) -> Result<Tenant, ServiceError> {
        ctx.require("tenant.read")?;
        Ok(ctx.tenant.clone())
    }

    /// Deactivation is owner-only: an inactive tenant refuses every
    /// tenant-scoped request, so it cannot be switched back on through the API.
    pub async fn update(&self, ctx: &AccessContext, req: &UpdateTenantRequest) -> Result<Tenant, ServiceError> {
        check_update_allowed(ctx, req)?;

        let tenant = sqlx::query_as::<_, Tenant>(
            r#"
            UPDATE tenants
            SET name = COALESCE($2, name),
                is_active = COALESCE($3, is_active),
                updated_at = now()
            WHERE id = $1 AND deleted_at IS NULL
            RETURNING id, name, slug, is_active, created_at, updated_at, deleted_at
            "#,
        )
        .bind(ctx.tenant_id())
        .bind(req.name.as_deref().map(str::trim))
        .bind(req.is_active)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| ServiceError::not_found("Tenant"))?;

        tracing::info!(tenant = %tenant.slug, active = tenant.is_active, "Tenant updated");
        Ok(tenant)
    }

    pub async fn delete(&self, ctx: &AccessContext) -> Result<(), ServiceError> {
        ctx.require_owner()?;

        sqlx::query("UPDATE tenants SET deleted_at = now(), updated_at = now() WHERE id = $1 AND deleted_at IS NULL")
            .bind(ctx.tenant_id())
            .execute(&self.pool)
            .await?;

        tracing::info!(tenant = %ctx.tenant.slug, "Tenant soft-deleted");
        Ok(())
    }
}

fn check_update_allowed(ctx: &AccessContext, req: &UpdateTenantRequest) -> Result<(), ServiceError> {
    ctx.require("tenant.manage")?;
    if req.is_active == Some(false) {
        ctx.require_owner()?;
        tracing::warn!(tenant = %ctx.tenant.slug, user = %ctx.user_id, "Tenant deactivation requested");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::rbac_service::test_context;

    #[test]
    fn slug_is_derived_from_name_when_missing() {
        let req = CreateTenantRequest {
            name: "Summer Festival 2026".into(),
            slug: None,
        };
        assert_eq!(req.resolved_slug(), "summer-festival-2026");
        assert!(req.validate().is_ok());

        let blank = CreateTenantRequest {
            name: "Acme".into(),
            slug: Some("  ".into()),
        };
        assert_eq!(blank.resolved_slug(), "acme");
    }

    #[test]
    fn rejects_bad_names_and_slugs() {
        let req = CreateTenantRequest {
            name: "".into(),
            slug: Some("Bad Slug".into()),
        };
        match req.validate() {
            Err(ServiceError::Validation(errors)) => {
                assert!(errors.get("name").is_some());
                assert!(errors.get("slug").is_some());
            }
            other => panic!("expected validation error, got {:?}", other),
        }

        let symbols_only = CreateTenantRequest {
            name: "!!!".into(),
            slug: None,
        };
        assert!(symbols_only.validate().is_err());
    }

    #[test]
    fn only_the_owner_may_deactivate() {
        let deactivate = UpdateTenantRequest {
            name: None,
            is_active: Some(false),
        };
        let rename = UpdateTenantRequest {
            name: Some("Acme Live".into()),
            is_active: None,
        };

        let manager = test_context(false, &["tenant.manage"], &[]);
        assert!(check_update_allowed(&manager, &rename).is_ok());
        assert!(matches!(
            check_update_allowed(&manager, &deactivate),
            Err(ServiceError::Forbidden(_))
        ));

        let owner = test_context(true, &[], &[]);
        assert!(check_update_allowed(&owner, &deactivate).is_ok());

        let reader = test_context(false, &["tenant.read"], &[]);
        assert!(check_update_allowed(&reader, &rename).is_err());
    }
}
