//! Departments and their membership.
//!
//! Department-level authority is separate from tenant roles: a department
//! `admin` may manage that one department without holding any tenant-wide
//! permission, while `departments.manage` stands in for admin rights on every
//! department of the tenant.

use serde::Deserialize;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::config::ApiConfig;
use crate::database::models::{Department, DepartmentMember};
use crate::filter::{contains_pattern, ListFilter, ListParams, Page};
use crate::services::{ensure_active_member, AccessContext, EventService, ServiceError};
use crate::types::DepartmentRole;
use crate::validation::{FieldErrors, Validate};

pub const DEPARTMENT_ORDER_COLUMNS: &[&str] = &["name", "created_at"];

const DEPARTMENT_COLUMNS: &str = "id, tenant_id, event_id, name, description, created_by, created_at, updated_at";

#[derive(Debug, Deserialize)]
pub struct CreateDepartmentRequest {
    pub name: String,
    pub description: Option<String>,
    pub event_id: Option<Uuid>,
}

impl Validate for CreateDepartmentRequest {
    fn validate(&self) -> Result<(), ServiceError> {
        let mut errors = FieldErrors::new();
        errors.required_text("name", &self.name, 200);
        errors.optional_text("description", self.description.as_deref(), 5_000);
        errors.into_result()
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateDepartmentRequest {
    pub name: Option<String>,
    pub description: Option<String>,
}

impl Validate for UpdateDepartmentRequest {
    fn validate(&self) -> Result<(), ServiceError> {
        let mut errors = FieldErrors::new();
        errors.optional_text("name", self.name.as_deref(), 200);
        errors.optional_text("description", self.description.as_deref(), 5_000);
        errors.into_result()
    }
}

#[derive(Debug, Deserialize)]
pub struct AddDepartmentMemberRequest {
    pub user_id: Uuid,
    #[serde(default = "default_member_role")]
    pub role: DepartmentRole,
}

fn default_member_role() -> DepartmentRole {
    DepartmentRole::Member
}

impl Validate for AddDepartmentMemberRequest {
    fn validate(&self) -> Result<(), ServiceError> {
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateDepartmentMemberRequest {
    pub role: DepartmentRole,
}

impl Validate for UpdateDepartmentMemberRequest {
    fn validate(&self) -> Result<(), ServiceError> {
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct DepartmentQuery {
    pub event_id: Option<Uuid>,
    pub search: Option<String>,
}

pub struct DepartmentService {
    pool: PgPool,
}

impl DepartmentService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Passes when `user_id` belongs to the department, or the caller holds
    /// `departments.manage`.
    pub async fn assert_member(&self, ctx: &AccessContext, department_id: Uuid, user_id: Uuid) -> Result<(), ServiceError> {
        self.find(ctx.tenant_id(), department_id).await?;
        if ctx.allows("departments.manage") {
            return Ok(());
        }
        if !ctx.module_enabled("departments") {
            return ctx.require("departments.read");
        }
        match self.member_role(department_id, user_id).await? {
            Some(_) => Ok(()),
            None => {
                tracing::warn!(department = %department_id, user = %user_id, "Department membership required");
                Err(ServiceError::Forbidden("You are not a member of this department".to_string()))
            }
        }
    }

    /// Passes when `user_id` is a department admin, or the caller holds
    /// `departments.manage`.
    pub async fn assert_admin(&self, ctx: &AccessContext, department_id: Uuid, user_id: Uuid) -> Result<(), ServiceError> {
        self.find(ctx.tenant_id(), department_id).await?;
        if ctx.allows("departments.manage") {
            return Ok(());
        }
        if !ctx.module_enabled("departments") {
            return ctx.require("departments.manage");
        }
        match self.member_role(department_id, user_id).await? {
            Some(DepartmentRole::Admin) => Ok(()),
            _ => {
                tracing::warn!(department = %department_id, user = %user_id, "Department admin required");
                Err(ServiceError::Forbidden("Department admin rights required".to_string()))
            }
        }
    }

    pub async fn list(
        &self,
        ctx: &AccessContext,
        api: &ApiConfig,
        params: &ListParams,
        query: &DepartmentQuery,
    ) -> Result<Page<Department>, ServiceError> {
        ctx.require("departments.read")?;
        let filter = ListFilter::from_params(params, api, DEPARTMENT_ORDER_COLUMNS, "name")?;

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM departments");
        push_where(&mut count, ctx.tenant_id(), query);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::<Postgres>::new(format!("SELECT {} FROM departments", DEPARTMENT_COLUMNS));
        push_where(&mut select, ctx.tenant_id(), query);
        filter.push_tail(&mut select);
        let items = select.build_query_as::<Department>().fetch_all(&self.pool).await?;

        Ok(filter.page(items, total))
    }

    pub async fn get(&self, ctx: &AccessContext, id: Uuid) -> Result<Department, ServiceError> {
        ctx.require("departments.read")?;
        self.find(ctx.tenant_id(), id).await
    }

    /// Create a department; the creator becomes its first admin.
    pub async fn create(&self, ctx: &AccessContext, req: &CreateDepartmentRequest) -> Result<Department, ServiceError> {
        ctx.require("departments.create")?;
        if let Some(event_id) = req.event_id {
            match EventService::new(self.pool.clone()).find(ctx.tenant_id(), event_id).await {
                Ok(_) => {}
                Err(ServiceError::NotFound(_)) => {
                    let mut errors = FieldErrors::new();
                    errors.add("event_id", "Event does not exist in this tenant");
                    return Err(ServiceError::Validation(errors));
                }
                Err(e) => return Err(e),
            }
        }

        let mut tx = self.pool.begin().await?;
        let sql = format!(
            r#"
            INSERT INTO departments (id, tenant_id, event_id, name, description, created_by)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            DEPARTMENT_COLUMNS
        );
        let department = sqlx::query_as::<_, Department>(&sql)
            .bind(Uuid::new_v4())
            .bind(ctx.tenant_id())
            .bind(req.event_id)
            .bind(req.name.trim())
            .bind(req.description.as_deref())
            .bind(ctx.user_id)
            .fetch_one(&mut *tx)
            .await?;

        sqlx::query("INSERT INTO department_members (department_id, user_id, role) VALUES ($1, $2, $3)")
            .bind(department.id)
            .bind(ctx.user_id)
            .bind(DepartmentRole::Admin.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(tenant = %ctx.tenant.slug, department = %department.id, "Department created");
        Ok(department)
    }

    pub async fn update(
        &self,
        ctx: &AccessContext,
        id: Uuid,
        req: &UpdateDepartmentRequest,
    ) -> Result<Department, ServiceError> {
        self.assert_admin(ctx, id, ctx.user_id).await?;

        let sql = format!(
            r#"
            UPDATE departments
            SET name = COALESCE($3, name),
                description = COALESCE($4, description),
                updated_at = now()
            WHERE tenant_id = $1 AND id = $2 AND deleted_at IS NULL
            RETURNING {}
            "#,
            DEPARTMENT_COLUMNS
        );
        sqlx::query_as::<_, Department>(&sql)
            .bind(ctx.tenant_id())
            .bind(id)
            .bind(req.name.as_deref().map(str::trim))
            .bind(req.description.as_deref())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ServiceError::not_found("Department"))
    }

    pub async fn delete(&self, ctx: &AccessContext, id: Uuid) -> Result<(), ServiceError> {
        self.assert_admin(ctx, id, ctx.user_id).await?;

        sqlx::query("UPDATE departments SET deleted_at = now() WHERE tenant_id = $1 AND id = $2")
            .bind(ctx.tenant_id())
            .bind(id)
            .execute(&self.pool)
            .await?;

        tracing::info!(tenant = %ctx.tenant.slug, department = %id, "Department deleted");
        Ok(())
    }

    pub async fn list_members(&self, ctx: &AccessContext, id: Uuid) -> Result<Vec<DepartmentMember>, ServiceError> {
        self.assert_member(ctx, id, ctx.user_id).await?;

        let members = sqlx::query_as::<_, DepartmentMember>(
            r#"
            SELECT dm.department_id, dm.user_id, u.email, u.name, dm.role, dm.joined_at
            FROM department_members dm
            JOIN users u ON u.id = dm.user_id
            WHERE dm.department_id = $1
            ORDER BY dm.role, u.name
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        Ok(members)
    }

    pub async fn add_member(
        &self,
        ctx: &AccessContext,
        id: Uuid,
        req: &AddDepartmentMemberRequest,
    ) -> Result<DepartmentMember, ServiceError> {
        self.assert_admin(ctx, id, ctx.user_id).await?;
        ensure_active_member(&self.pool, ctx.tenant_id(), req.user_id, "user_id").await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO department_members (department_id, user_id, role)
            VALUES ($1, $2, $3)
            ON CONFLICT (department_id, user_id) DO NOTHING
            "#,
        )
        .bind(id)
        .bind(req.user_id)
        .bind(req.role.as_str())
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(ServiceError::Conflict("User is already a member of this department".to_string()));
        }

        tracing::info!(department = %id, user = %req.user_id, role = %req.role, "Department member added");
        fetch_member(&self.pool, id, req.user_id).await
    }

    pub async fn update_member(
        &self,
        ctx: &AccessContext,
        id: Uuid,
        user_id: Uuid,
        req: &UpdateDepartmentMemberRequest,
    ) -> Result<DepartmentMember, ServiceError> {
        self.assert_admin(ctx, id, ctx.user_id).await?;

        let mut tx = self.pool.begin().await?;
        let admins = lock_admins(&mut tx, id).await?;
        let current = fetch_member(&mut *tx, id, user_id).await?;

        if current.role == DepartmentRole::Admin && req.role != DepartmentRole::Admin {
            check_not_last_admin(&admins, user_id)?;
        }

        sqlx::query("UPDATE department_members SET role = $3 WHERE department_id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .bind(req.role.as_str())
            .execute(&mut *tx)
            .await?;
        let updated = fetch_member(&mut *tx, id, user_id).await?;
        tx.commit().await?;

        Ok(updated)
    }

    pub async fn remove_member(&self, ctx: &AccessContext, id: Uuid, user_id: Uuid) -> Result<(), ServiceError> {
        self.assert_admin(ctx, id, ctx.user_id).await?;

        let mut tx = self.pool.begin().await?;
        let admins = lock_admins(&mut tx, id).await?;
        let current = fetch_member(&mut *tx, id, user_id).await?;

        if current.role == DepartmentRole::Admin {
            check_not_last_admin(&admins, user_id)?;
        }

        sqlx::query("DELETE FROM department_members WHERE department_id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(department = %id, user = %user_id, "Department member removed");
        Ok(())
    }

    pub(crate) async fn find(&self, tenant_id: Uuid, id: Uuid) -> Result<Department, ServiceError> {
        let sql = format!(
            "SELECT {} FROM departments WHERE tenant_id = $1 AND id = $2 AND deleted_at IS NULL",
            DEPARTMENT_COLUMNS
        );
        sqlx::query_as::<_, Department>(&sql)
            .bind(tenant_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ServiceError::not_found("Department"))
    }

    async fn member_role(&self, department_id: Uuid, user_id: Uuid) -> Result<Option<DepartmentRole>, ServiceError> {
        let role: Option<String> =
            sqlx::query_scalar("SELECT role FROM department_members WHERE department_id = $1 AND user_id = $2")
                .bind(department_id)
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(role.and_then(|r| r.parse().ok()))
    }
}

async fn fetch_member<'e, E>(executor: E, department_id: Uuid, user_id: Uuid) -> Result<DepartmentMember, ServiceError>
where
    E: sqlx::PgExecutor<'e>,
{
    sqlx::query_as::<_, DepartmentMember>(
        r#"
        SELECT dm.department_id, dm.user_id, u.email, u.name, dm.role, dm.joined_at
        FROM department_members dm
        JOIN users u ON u.id = dm.user_id
        WHERE dm.department_id = $1 AND dm.user_id = $2
        "#,
    )
    .bind(department_id)
    .bind(user_id)
    .fetch_optional(executor)
    .await?
    .ok_or_else(|| ServiceError::not_found("Department member"))
}

/// Lock the department's admin rows for the rest of the transaction and
/// return their user ids.
async fn lock_admins(tx: &mut sqlx::Transaction<'_, Postgres>, department_id: Uuid) -> Result<Vec<Uuid>, ServiceError> {
    let admins: Vec<Uuid> = sqlx::query_scalar(
        "SELECT user_id FROM department_members WHERE department_id = $1 AND role = 'admin' FOR UPDATE",
    )
    .bind(department_id)
    .fetch_all(&mut **tx)
    .await?;
    Ok(admins)
}

fn check_not_last_admin(admins: &[Uuid], leaving: Uuid) -> Result<(), ServiceError> {
    if admins.iter().all(|id| *id == leaving) {
        return Err(ServiceError::Conflict(
            "A department must keep at least one admin".to_string(),
        ));
    }
    Ok(())
}

/// Guard for dropping a user from every department of the tenant at once.
/// Locks the admin rows of each live department the user administers, in id
/// order, and fails with 409 naming the first department they are the sole
/// admin of.
pub(crate) async fn ensure_not_sole_admin(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    tenant_id: Uuid,
    user_id: Uuid,
) -> Result<(), ServiceError> {
    let administered: Vec<(Uuid, String)> = sqlx::query_as(
        r#"
        SELECT d.id, d.name
        FROM departments d
        JOIN department_members dm ON dm.department_id = d.id
        WHERE d.tenant_id = $1 AND d.deleted_at IS NULL AND dm.user_id = $2 AND dm.role = 'admin'
        ORDER BY d.id
        "#,
    )
    .bind(tenant_id)
    .bind(user_id)
    .fetch_all(&mut **tx)
    .await?;

    for (department_id, name) in administered {
        let admins = lock_admins(tx, department_id).await?;
        if check_not_last_admin(&admins, user_id).is_err() {
            tracing::warn!(department = %department_id, user = %user_id, "Refusing to drop the last department admin");
            return Err(ServiceError::Conflict(format!(
                "User is the last admin of department '{}'; appoint another admin first",
                name
            )));
        }
    }
    Ok(())
}

fn push_where(qb: &mut QueryBuilder<'_, Postgres>, tenant_id: Uuid, query: &DepartmentQuery) {
    qb.push(" WHERE deleted_at IS NULL AND tenant_id = ").push_bind(tenant_id);
    if let Some(event_id) = query.event_id {
        qb.push(" AND event_id = ").push_bind(event_id);
    }
    if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        qb.push(" AND name ILIKE ").push_bind(contains_pattern(search));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_admin_cannot_leave() {
        let only = Uuid::new_v4();
        let other = Uuid::new_v4();
        assert!(matches!(check_not_last_admin(&[only], only), Err(ServiceError::Conflict(_))));
        assert!(check_not_last_admin(&[only, other], only).is_ok());
        // Demoting a non-admin never touches the admin set
        assert!(check_not_last_admin(&[only], other).is_ok());
    }

    #[test]
    fn add_member_defaults_to_member_role() {
        let req: AddDepartmentMemberRequest =
            serde_json::from_str(r#"{"user_id":"6f1c4b1e-2b7d-4f7e-9a51-0c8d9f1b2a33"}"#).unwrap();
        assert_eq!(req.role, DepartmentRole::Member);
        let req: AddDepartmentMemberRequest =
            serde_json::from_str(r#"{"user_id":"6f1c4b1e-2b7d-4f7e-9a51-0c8d9f1b2a33","role":"admin"}"#).unwrap();
        assert_eq!(req.role, DepartmentRole::Admin);
    }

    #[test]
    fn department_name_is_required() {
        let req = CreateDepartmentRequest {
            name: "   ".into(),
            description: None,
            event_id: None,
        };
        assert!(req.validate().is_err());
    }
}
