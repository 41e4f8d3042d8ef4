//! Tenant-scoped role based access control.
//!
//! A request's authority inside a tenant is captured once per request in an
//! [`AccessContext`]: the caller's membership, their role's permission keys
//! and the set of modules enabled for the tenant. Permission keys have the
//! form `<module>.<action>`; a key is granted when its module is enabled and
//! either the caller owns the tenant or their role carries the key.

use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::{BTreeSet, HashSet};
use uuid::Uuid;

use crate::database::models::{Membership, Permission, Role, RoleWithPermissions, Tenant, TenantModule};
use crate::services::ServiceError;
use crate::validation::{FieldErrors, Validate};

/// Module that can never be disabled; it carries the permission to re-enable others.
pub const CORE_MODULE: &str = "tenant";

pub const ADMIN_ROLE: &str = "Admin";
pub const MEMBER_ROLE: &str = "Member";

/// Non-read permissions granted to the default member role
pub const MEMBER_EXTRA_PERMISSIONS: &[&str] = &[
    "tasks.create",
    "chat.write",
    "feedback.write",
    "attachments.create",
];

#[derive(Debug, Deserialize)]
pub struct SetModuleRequest {
    pub enabled: bool,
}

impl Validate for SetModuleRequest {
    fn validate(&self) -> Result<(), ServiceError> {
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateRoleRequest {
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

impl Validate for CreateRoleRequest {
    fn validate(&self) -> Result<(), ServiceError> {
        let mut errors = FieldErrors::new();
        errors.required_text("name", &self.name, 100);
        errors.optional_text("description", self.description.as_deref(), 1_000);
        errors.into_result()
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateRoleRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

impl Validate for UpdateRoleRequest {
    fn validate(&self) -> Result<(), ServiceError> {
        let mut errors = FieldErrors::new();
        errors.optional_text("name", self.name.as_deref(), 100);
        errors.optional_text("description", self.description.as_deref(), 1_000);
        errors.into_result()
    }
}

#[derive(Debug, Deserialize)]
pub struct SetPermissionsRequest {
    pub permissions: Vec<String>,
}

impl Validate for SetPermissionsRequest {
    fn validate(&self) -> Result<(), ServiceError> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct AccessContext {
    pub tenant: Tenant,
    pub user_id: Uuid,
    pub email: String,
    pub membership: Membership,
    pub role_name: Option<String>,
    pub permissions: HashSet<String>,
    pub enabled_modules: HashSet<String>,
}

impl AccessContext {
    pub fn tenant_id(&self) -> Uuid {
        self.tenant.id
    }

    pub fn is_owner(&self) -> bool {
        self.membership.is_owner
    }

    pub fn module_enabled(&self, module: &str) -> bool {
        module == CORE_MODULE || self.enabled_modules.contains(module)
    }

    pub fn allows(&self, permission: &str) -> bool {
        let module = permission.split('.').next().unwrap_or_default();
        if !self.module_enabled(module) {
            return false;
        }
        self.is_owner() || self.permissions.contains(permission)
    }

    pub fn require(&self, permission: &str) -> Result<(), ServiceError> {
        if self.allows(permission) {
            return Ok(());
        }
        let module = permission.split('.').next().unwrap_or_default();
        tracing::warn!(
            tenant = %self.tenant.slug,
            user = %self.user_id,
            permission,
            "Permission denied"
        );
        if !self.module_enabled(module) {
            Err(ServiceError::Forbidden(format!(
                "Module '{}' is not enabled for this tenant",
                module
            )))
        } else {
            Err(ServiceError::Forbidden(format!("Missing permission '{}'", permission)))
        }
    }

    pub fn require_owner(&self) -> Result<(), ServiceError> {
        if self.is_owner() {
            Ok(())
        } else {
            Err(ServiceError::Forbidden("Only the tenant owner can do this".to_string()))
        }
    }

    /// Permission keys the caller effectively holds, given the full catalog.
    pub fn effective_permissions<'a>(&self, catalog: impl IntoIterator<Item = &'a str>) -> Vec<String> {
        catalog
            .into_iter()
            .filter(|key| self.allows(key))
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AccessSummary {
    pub tenant_id: Uuid,
    pub tenant_slug: String,
    pub role: Option<String>,
    pub is_owner: bool,
    pub modules: Vec<String>,
    pub permissions: Vec<String>,
}

pub struct RbacService {
    pool: PgPool,
}

impl RbacService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Resolve the caller's authority in a tenant. Fails with 403 when the
    /// tenant is inactive or deleted, or the caller has no active membership.
    pub async fn load_access(&self, tenant_id: Uuid, user_id: Uuid, email: &str) -> Result<AccessContext, ServiceError> {
        let tenant: Option<Tenant> = sqlx::query_as(
            r#"
            SELECT id, name, slug, is_active, created_at, updated_at, deleted_at
            FROM tenants
            WHERE id = $1
            "#,
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;

        let tenant = match tenant {
            Some(t) if t.is_usable() => t,
            _ => {
                tracing::warn!(%tenant_id, "Tenant validation failed: not found or inactive");
                return Err(ServiceError::Forbidden("Tenant is not active or does not exist".to_string()));
            }
        };

        let membership: Option<Membership> = sqlx::query_as(
            r#"
            SELECT m.id, m.tenant_id, m.user_id, m.role_id, m.is_owner, m.is_active, m.joined_at
            FROM tenant_memberships m
            JOIN users u ON u.id = m.user_id
            WHERE m.tenant_id = $1 AND m.user_id = $2 AND u.is_active
            "#,
        )
        .bind(tenant_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let membership = match membership {
            Some(m) if m.is_active => m,
            _ => {
                tracing::warn!(tenant = %tenant.slug, %user_id, "Membership validation failed");
                return Err(ServiceError::Forbidden(format!(
                    "User is not an active member of tenant '{}'",
                    tenant.slug
                )));
            }
        };

        let (role_name, permissions) = match membership.role_id {
            Some(role_id) => {
                let name: Option<String> = sqlx::query_scalar("SELECT name FROM roles WHERE id = $1")
                    .bind(role_id)
                    .fetch_optional(&self.pool)
                    .await?;
                let keys: Vec<String> = sqlx::query_scalar(
                    r#"
                    SELECT p.key
                    FROM role_permissions rp
                    JOIN permissions p ON p.id = rp.permission_id
                    WHERE rp.role_id = $1
                    "#,
                )
                .bind(role_id)
                .fetch_all(&self.pool)
                .await?;
                (name, keys.into_iter().collect())
            }
            None => (None, HashSet::new()),
        };

        let enabled_modules: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT m.key
            FROM tenant_modules tm
            JOIN modules m ON m.id = tm.module_id
            WHERE tm.tenant_id = $1 AND tm.enabled
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(AccessContext {
            tenant,
            user_id,
            email: email.to_string(),
            membership,
            role_name,
            permissions,
            enabled_modules: enabled_modules.into_iter().collect(),
        })
    }

    pub async fn summarize(&self, ctx: &AccessContext) -> Result<AccessSummary, ServiceError> {
        let catalog: Vec<String> = sqlx::query_scalar("SELECT key FROM permissions ORDER BY key")
            .fetch_all(&self.pool)
            .await?;
        let mut modules: Vec<String> = ctx.enabled_modules.iter().cloned().collect();
        modules.sort();

        Ok(AccessSummary {
            tenant_id: ctx.tenant_id(),
            tenant_slug: ctx.tenant.slug.clone(),
            role: ctx.role_name.clone(),
            is_owner: ctx.is_owner(),
            modules,
            permissions: ctx.effective_permissions(catalog.iter().map(String::as_str)),
        })
    }

    pub async fn list_modules(&self, ctx: &AccessContext) -> Result<Vec<TenantModule>, ServiceError> {
        ctx.require("tenant.read")?;

        let modules = sqlx::query_as::<_, TenantModule>(
            r#"
            SELECT m.id, m.key, m.name, m.description, COALESCE(tm.enabled, FALSE) AS enabled
            FROM modules m
            LEFT JOIN tenant_modules tm ON tm.module_id = m.id AND tm.tenant_id = $1
            ORDER BY m.key
            "#,
        )
        .bind(ctx.tenant_id())
        .fetch_all(&self.pool)
        .await?;

        Ok(modules)
    }

    pub async fn set_module_enabled(
        &self,
        ctx: &AccessContext,
        key: &str,
        enabled: bool,
    ) -> Result<TenantModule, ServiceError> {
        ctx.require("tenant.manage")?;

        if key == CORE_MODULE && !enabled {
            return Err(ServiceError::Unprocessable(format!(
                "The '{}' module cannot be disabled",
                CORE_MODULE
            )));
        }

        let module_id: Uuid = sqlx::query_scalar("SELECT id FROM modules WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ServiceError::not_found("Module"))?;

        sqlx::query(
            r#"
            INSERT INTO tenant_modules (tenant_id, module_id, enabled)
            VALUES ($1, $2, $3)
            ON CONFLICT (tenant_id, module_id) DO UPDATE SET enabled = EXCLUDED.enabled
            "#,
        )
        .bind(ctx.tenant_id())
        .bind(module_id)
        .bind(enabled)
        .execute(&self.pool)
        .await?;

        tracing::info!(tenant = %ctx.tenant.slug, module = key, enabled, "Module assignment changed");

        let module = sqlx::query_as::<_, TenantModule>(
            r#"
            SELECT m.id, m.key, m.name, m.description, tm.enabled
            FROM modules m
            JOIN tenant_modules tm ON tm.module_id = m.id AND tm.tenant_id = $1
            WHERE m.id = $2
            "#,
        )
        .bind(ctx.tenant_id())
        .bind(module_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(module)
    }

    pub async fn list_permissions(&self, ctx: &AccessContext) -> Result<Vec<Permission>, ServiceError> {
        ctx.require("roles.read")?;

        let permissions = sqlx::query_as::<_, Permission>(
            r#"
            SELECT p.id, p.key, p.action, m.key AS module_key, p.description
            FROM permissions p
            JOIN modules m ON m.id = p.module_id
            ORDER BY p.key
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(permissions)
    }

    pub async fn list_roles(&self, ctx: &AccessContext) -> Result<Vec<RoleWithPermissions>, ServiceError> {
        ctx.require("roles.read")?;

        let roles = sqlx::query_as::<_, Role>(
            r#"
            SELECT id, tenant_id, name, description, created_at, updated_at
            FROM roles
            WHERE tenant_id = $1
            ORDER BY name
            "#,
        )
        .bind(ctx.tenant_id())
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(roles.len());
        for role in roles {
            out.push(self.with_permissions(role).await?);
        }
        Ok(out)
    }

    pub async fn get_role(&self, ctx: &AccessContext, role_id: Uuid) -> Result<RoleWithPermissions, ServiceError> {
        ctx.require("roles.read")?;
        let role = self.find_role(ctx.tenant_id(), role_id).await?;
        self.with_permissions(role).await
    }

    pub async fn create_role(
        &self,
        ctx: &AccessContext,
        name: &str,
        description: Option<&str>,
        permission_keys: &[String],
    ) -> Result<RoleWithPermissions, ServiceError> {
        ctx.require("roles.manage")?;

        let mut tx = self.pool.begin().await?;
        let role_id = Uuid::new_v4();
        let inserted = sqlx::query(
            r#"
            INSERT INTO roles (id, tenant_id, name, description)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (tenant_id, name) DO NOTHING
            "#,
        )
        .bind(role_id)
        .bind(ctx.tenant_id())
        .bind(name.trim())
        .bind(description)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(ServiceError::Conflict(format!("Role '{}' already exists", name.trim())));
        }

        replace_role_permissions(&mut tx, role_id, permission_keys).await?;
        tx.commit().await?;

        tracing::info!(tenant = %ctx.tenant.slug, role = name, "Role created");
        let role = self.find_role(ctx.tenant_id(), role_id).await?;
        self.with_permissions(role).await
    }

    pub async fn update_role(
        &self,
        ctx: &AccessContext,
        role_id: Uuid,
        name: Option<&str>,
        description: Option<&str>,
    ) -> Result<RoleWithPermissions, ServiceError> {
        ctx.require("roles.manage")?;
        self.find_role(ctx.tenant_id(), role_id).await?;

        let role = sqlx::query_as::<_, Role>(
            r#"
            UPDATE roles
            SET name = COALESCE($3, name),
                description = COALESCE($4, description),
                updated_at = now()
            WHERE tenant_id = $1 AND id = $2
            RETURNING id, tenant_id, name, description, created_at, updated_at
            "#,
        )
        .bind(ctx.tenant_id())
        .bind(role_id)
        .bind(name.map(str::trim))
        .bind(description)
        .fetch_one(&self.pool)
        .await?;

        self.with_permissions(role).await
    }

    pub async fn delete_role(&self, ctx: &AccessContext, role_id: Uuid) -> Result<(), ServiceError> {
        ctx.require("roles.manage")?;
        self.find_role(ctx.tenant_id(), role_id).await?;

        let assigned: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tenant_memberships WHERE role_id = $1")
            .bind(role_id)
            .fetch_one(&self.pool)
            .await?;
        if assigned > 0 {
            return Err(ServiceError::Conflict(format!(
                "Role is assigned to {} member(s); reassign them first",
                assigned
            )));
        }

        sqlx::query("DELETE FROM roles WHERE tenant_id = $1 AND id = $2")
            .bind(ctx.tenant_id())
            .bind(role_id)
            .execute(&self.pool)
            .await?;

        tracing::info!(tenant = %ctx.tenant.slug, %role_id, "Role deleted");
        Ok(())
    }

    pub async fn set_role_permissions(
        &self,
        ctx: &AccessContext,
        role_id: Uuid,
        permission_keys: &[String],
    ) -> Result<RoleWithPermissions, ServiceError> {
        ctx.require("roles.manage")?;
        let role = self.find_role(ctx.tenant_id(), role_id).await?;

        let mut tx = self.pool.begin().await?;
        replace_role_permissions(&mut tx, role_id, permission_keys).await?;
        sqlx::query("UPDATE roles SET updated_at = now() WHERE id = $1")
            .bind(role_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(tenant = %ctx.tenant.slug, role = %role.name, count = permission_keys.len(), "Role permissions replaced");
        let role = self.find_role(ctx.tenant_id(), role_id).await?;
        self.with_permissions(role).await
    }

    pub(crate) async fn find_role(&self, tenant_id: Uuid, role_id: Uuid) -> Result<Role, ServiceError> {
        sqlx::query_as::<_, Role>(
            r#"
            SELECT id, tenant_id, name, description, created_at, updated_at
            FROM roles
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(tenant_id)
        .bind(role_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| ServiceError::not_found("Role"))
    }

    async fn with_permissions(&self, role: Role) -> Result<RoleWithPermissions, ServiceError> {
        let permissions: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT p.key
            FROM role_permissions rp
            JOIN permissions p ON p.id = rp.permission_id
            WHERE rp.role_id = $1
            ORDER BY p.key
            "#,
        )
        .bind(role.id)
        .fetch_all(&self.pool)
        .await?;

        let member_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tenant_memberships WHERE role_id = $1")
            .bind(role.id)
            .fetch_one(&self.pool)
            .await?;

        Ok(RoleWithPermissions {
            role,
            permissions,
            member_count,
        })
    }
}

/// Replace a role's permission set inside the caller's transaction.
/// Unknown keys abort with 422 naming them.
pub(crate) async fn replace_role_permissions(
    tx: &mut Transaction<'_, Postgres>,
    role_id: Uuid,
    permission_keys: &[String],
) -> Result<(), ServiceError> {
    let wanted: BTreeSet<&str> = permission_keys.iter().map(|k| k.trim()).collect();
    let wanted: Vec<String> = wanted.into_iter().map(str::to_string).collect();

    let found: Vec<(Uuid, String)> = sqlx::query_as("SELECT id, key FROM permissions WHERE key = ANY($1)")
        .bind(&wanted)
        .fetch_all(&mut **tx)
        .await?;

    let unknown = unknown_keys(&wanted, found.iter().map(|(_, k)| k.as_str()));
    if !unknown.is_empty() {
        return Err(ServiceError::Unprocessable(format!(
            "Unknown permission(s): {}",
            unknown.join(", ")
        )));
    }

    sqlx::query("DELETE FROM role_permissions WHERE role_id = $1")
        .bind(role_id)
        .execute(&mut **tx)
        .await?;

    let ids: Vec<Uuid> = found.into_iter().map(|(id, _)| id).collect();
    sqlx::query(
        r#"
        INSERT INTO role_permissions (role_id, permission_id)
        SELECT $1, unnest($2::uuid[])
        "#,
    )
    .bind(role_id)
    .bind(&ids)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Create the default `Admin` and `Member` roles for a new tenant and return
/// the admin role id.
pub(crate) async fn seed_default_roles(
    tx: &mut Transaction<'_, Postgres>,
    tenant_id: Uuid,
) -> Result<Uuid, ServiceError> {
    let admin_id = Uuid::new_v4();
    let member_id = Uuid::new_v4();

    sqlx::query(
        r#"
        INSERT INTO roles (id, tenant_id, name, description)
        VALUES ($1, $3, $4, 'Full access to every module'),
               ($2, $3, $5, 'Read access plus day-to-day contributions')
        "#,
    )
    .bind(admin_id)
    .bind(member_id)
    .bind(tenant_id)
    .bind(ADMIN_ROLE)
    .bind(MEMBER_ROLE)
    .execute(&mut **tx)
    .await?;

    sqlx::query("INSERT INTO role_permissions (role_id, permission_id) SELECT $1, id FROM permissions")
        .bind(admin_id)
        .execute(&mut **tx)
        .await?;

    let extras: Vec<String> = MEMBER_EXTRA_PERMISSIONS.iter().map(|s| s.to_string()).collect();
    sqlx::query(
        r#"
        INSERT INTO role_permissions (role_id, permission_id)
        SELECT $1, id FROM permissions WHERE action = 'read' OR key = ANY($2)
        "#,
    )
    .bind(member_id)
    .bind(&extras)
    .execute(&mut **tx)
    .await?;

    Ok(admin_id)
}

fn unknown_keys<'a>(wanted: &[String], found: impl Iterator<Item = &'a str>) -> Vec<String> {
    let found: HashSet<&str> = found.collect();
    wanted
        .iter()
        .filter(|k| !found.contains(k.as_str()))
        .cloned()
        .collect()
}

/// Context for a member of a fresh tenant holding exactly `permissions`
/// with `modules` enabled.
#[cfg(test)]
pub(crate) fn test_context(is_owner: bool, permissions: &[&str], modules: &[&str]) -> AccessContext {
    use chrono::Utc;

    let tenant_id = Uuid::new_v4();
    let user_id = Uuid::new_v4();
    AccessContext {
        tenant: Tenant {
            id: tenant_id,
            name: "Acme".into(),
            slug: "acme".into(),
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
        },
        user_id,
        email: "ops@acme.test".into(),
        membership: Membership {
            id: Uuid::new_v4(),
            tenant_id,
            user_id,
            role_id: None,
            is_owner,
            is_active: true,
            joined_at: Utc::now(),
        },
        role_name: None,
        permissions: permissions.iter().map(|s| s.to_string()).collect(),
        enabled_modules: modules.iter().map(|s| s.to_string()).collect(),
    }
}
