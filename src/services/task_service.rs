use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::config::ApiConfig;
use crate::database::models::Task;
use crate::filter::{ListFilter, ListParams, Page};
use crate::services::{ensure_active_member, AccessContext, DepartmentService, EventService, ServiceError};
use crate::types::{TaskPriority, TaskStatus};
use crate::validation::{FieldErrors, Validate};

pub const TASK_ORDER_COLUMNS: &[&str] = &["created_at", "due_at", "title", "status", "priority", "updated_at"];

const TASK_COLUMNS: &str = "id, tenant_id, event_id, department_id, title, description, status, priority, \
                            assignee_id, due_at, created_by, created_at, updated_at";

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub title: String,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub event_id: Option<Uuid>,
    pub department_id: Option<Uuid>,
    pub assignee_id: Option<Uuid>,
    pub due_at: Option<DateTime<Utc>>,
}

impl Validate for CreateTaskRequest {
    fn validate(&self) -> Result<(), ServiceError> {
        let mut errors = FieldErrors::new();
        errors.required_text("title", &self.title, 300);
        errors.optional_text("description", self.description.as_deref(), 10_000);
        errors.into_result()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateTaskRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
    pub priority: Option<TaskPriority>,
    pub assignee_id: Option<Uuid>,
    pub due_at: Option<DateTime<Utc>>,
}

impl UpdateTaskRequest {
    /// True when the request touches nothing but `status`.
    pub fn is_status_only(&self) -> bool {
        self.status.is_some()
            && self.title.is_none()
            && self.description.is_none()
            && self.priority.is_none()
            && self.assignee_id.is_none()
            && self.due_at.is_none()
    }
}

impl Validate for UpdateTaskRequest {
    fn validate(&self) -> Result<(), ServiceError> {
        let mut errors = FieldErrors::new();
        errors.optional_text("title", self.title.as_deref(), 300);
        errors.optional_text("description", self.description.as_deref(), 10_000);
        errors.into_result()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct TaskQuery {
    pub event_id: Option<Uuid>,
    pub department_id: Option<Uuid>,
    pub assignee_id: Option<Uuid>,
    pub status: Option<TaskStatus>,
    /// Only tasks assigned to the caller
    #[serde(default)]
    pub mine: bool,
}

pub struct TaskService {
    pool: PgPool,
}

impl TaskService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn list(
        &self,
        ctx: &AccessContext,
        api: &ApiConfig,
        params: &ListParams,
        query: &TaskQuery,
    ) -> Result<Page<Task>, ServiceError> {
        ctx.require("tasks.read")?;
        let filter = ListFilter::from_params(params, api, TASK_ORDER_COLUMNS, "created_at desc")?;

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM tasks");
        push_where(&mut count, ctx, query);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::<Postgres>::new(format!("SELECT {} FROM tasks", TASK_COLUMNS));
        push_where(&mut select, ctx, query);
        filter.push_tail(&mut select);
        let items = select.build_query_as::<Task>().fetch_all(&self.pool).await?;

        Ok(filter.page(items, total))
    }

    pub async fn get(&self, ctx: &AccessContext, id: Uuid) -> Result<Task, ServiceError> {
        ctx.require("tasks.read")?;
        self.find(ctx.tenant_id(), id).await
    }

    pub async fn create(&self, ctx: &AccessContext, req: &CreateTaskRequest) -> Result<Task, ServiceError> {
        ctx.require("tasks.create")?;

        if let Some(department_id) = req.department_id {
            DepartmentService::new(self.pool.clone())
                .assert_member(ctx, department_id, ctx.user_id)
                .await
                .map_err(|e| field_not_found(e, "department_id", "Department does not exist in this tenant"))?;
        }
        if let Some(event_id) = req.event_id {
            EventService::new(self.pool.clone())
                .find(ctx.tenant_id(), event_id)
                .await
                .map_err(|e| field_not_found(e, "event_id", "Event does not exist in this tenant"))?;
        }
        if let Some(assignee_id) = req.assignee_id {
            ensure_active_member(&self.pool, ctx.tenant_id(), assignee_id, "assignee_id").await?;
        }

        let sql = format!(
            r#"
            INSERT INTO tasks (id, tenant_id, event_id, department_id, title, description,
                               status, priority, assignee_id, due_at, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {}
            "#,
            TASK_COLUMNS
        );
        let task = sqlx::query_as::<_, Task>(&sql)
            .bind(Uuid::new_v4())
            .bind(ctx.tenant_id())
            .bind(req.event_id)
            .bind(req.department_id)
            .bind(req.title.trim())
            .bind(req.description.as_deref())
            .bind(req.status.unwrap_or(TaskStatus::Todo).as_str())
            .bind(req.priority.unwrap_or(TaskPriority::Medium).as_str())
            .bind(req.assignee_id)
            .bind(req.due_at)
            .bind(ctx.user_id)
            .fetch_one(&self.pool)
            .await?;

        tracing::info!(tenant = %ctx.tenant.slug, task = %task.id, "Task created");
        Ok(task)
    }

    /// `tasks.update` allows any change; without it the assignee may still
    /// move their own task through its statuses.
    pub async fn update(&self, ctx: &AccessContext, id: Uuid, req: &UpdateTaskRequest) -> Result<Task, ServiceError> {
        let current = self.find(ctx.tenant_id(), id).await?;
        check_update_allowed(ctx, &current, req)?;

        if let Some(assignee_id) = req.assignee_id {
            ensure_active_member(&self.pool, ctx.tenant_id(), assignee_id, "assignee_id").await?;
        }

        let sql = format!(
            r#"
            UPDATE tasks
            SET title = COALESCE($3, title),
                description = COALESCE($4, description),
                status = COALESCE($5, status),
                priority = COALESCE($6, priority),
                assignee_id = COALESCE($7, assignee_id),
                due_at = COALESCE($8, due_at),
                updated_at = now()
            WHERE tenant_id = $1 AND id = $2 AND deleted_at IS NULL
            RETURNING {}
            "#,
            TASK_COLUMNS
        );
        sqlx::query_as::<_, Task>(&sql)
            .bind(ctx.tenant_id())
            .bind(id)
            .bind(req.title.as_deref().map(str::trim))
            .bind(req.description.as_deref())
            .bind(req.status.map(|s| s.as_str()))
            .bind(req.priority.map(|p| p.as_str()))
            .bind(req.assignee_id)
            .bind(req.due_at)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ServiceError::not_found("Task"))
    }

    pub async fn delete(&self, ctx: &AccessContext, id: Uuid) -> Result<(), ServiceError> {
        ctx.require("tasks.delete")?;
        self.find(ctx.tenant_id(), id).await?;

        sqlx::query("UPDATE tasks SET deleted_at = now() WHERE tenant_id = $1 AND id = $2")
            .bind(ctx.tenant_id())
            .bind(id)
            .execute(&self.pool)
            .await?;

        tracing::info!(tenant = %ctx.tenant.slug, task = %id, "Task deleted");
        Ok(())
    }

    pub(crate) async fn find(&self, tenant_id: Uuid, id: Uuid) -> Result<Task, ServiceError> {
        let sql = format!(
            "SELECT {} FROM tasks WHERE tenant_id = $1 AND id = $2 AND deleted_at IS NULL",
            TASK_COLUMNS
        );
        sqlx::query_as::<_, Task>(&sql)
            .bind(tenant_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ServiceError::not_found("Task"))
    }
}

fn check_update_allowed(ctx: &AccessContext, task: &Task, req: &UpdateTaskRequest) -> Result<(), ServiceError> {
    if ctx.allows("tasks.update") {
        return Ok(());
    }
    if ctx.module_enabled("tasks") && task.assignee_id == Some(ctx.user_id) && req.is_status_only() {
        return Ok(());
    }
    ctx.require("tasks.update")
}

/// Reports a missing referenced row as a field error instead of a 404.
fn field_not_found(err: ServiceError, field: &str, message: &str) -> ServiceError {
    match err {
        ServiceError::NotFound(_) => {
            let mut errors = FieldErrors::new();
            errors.add(field, message);
            ServiceError::Validation(errors)
        }
        other => other,
    }
}

fn push_where(qb: &mut QueryBuilder<'_, Postgres>, ctx: &AccessContext, query: &TaskQuery) {
    qb.push(" WHERE deleted_at IS NULL AND tenant_id = ").push_bind(ctx.tenant_id());
    if let Some(event_id) = query.event_id {
        qb.push(" AND event_id = ").push_bind(event_id);
    }
    if let Some(department_id) = query.department_id {
        qb.push(" AND department_id = ").push_bind(department_id);
    }
    let assignee = if query.mine { Some(ctx.user_id) } else { query.assignee_id };
    if let Some(assignee_id) = assignee {
        qb.push(" AND assignee_id = ").push_bind(assignee_id);
    }
    if let Some(status) = query.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::rbac_service::test_context;

    fn context(permissions: &[&str]) -> AccessContext {
        test_context(false, permissions, &["tasks"])
    }

    fn task(assignee_id: Option<Uuid>) -> Task {
        Task {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            event_id: None,
            department_id: None,
            title: "Book catering".into(),
            description: None,
            status: TaskStatus::Todo,
            priority: TaskPriority::Medium,
            assignee_id,
            due_at: None,
            created_by: Uuid::new_v4(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn assignee_may_change_only_status() {
        let ctx = context(&["tasks.read"]);
        let mine = task(Some(ctx.user_id));
        let status_only = UpdateTaskRequest {
            status: Some(TaskStatus::Done),
            ..Default::default()
        };
        assert!(check_update_allowed(&ctx, &mine, &status_only).is_ok());

        let retitle = UpdateTaskRequest {
            status: Some(TaskStatus::Done),
            title: Some("Renamed".into()),
            ..Default::default()
        };
        assert!(matches!(check_update_allowed(&ctx, &mine, &retitle), Err(ServiceError::Forbidden(_))));
    }

    #[test]
    fn others_need_update_permission() {
        let ctx = context(&["tasks.read"]);
        let theirs = task(Some(Uuid::new_v4()));
        let status_only = UpdateTaskRequest {
            status: Some(TaskStatus::InProgress),
            ..Default::default()
        };
        assert!(check_update_allowed(&ctx, &theirs, &status_only).is_err());

        let editor = context(&["tasks.read", "tasks.update"]);
        assert!(check_update_allowed(&editor, &theirs, &status_only).is_ok());
    }

    #[test]
    fn update_permission_alone_is_enough() {
        let editor = context(&["tasks.update"]);
        let theirs = task(Some(Uuid::new_v4()));
        let retitle = UpdateTaskRequest {
            title: Some("Confirm headcount".into()),
            ..Default::default()
        };
        assert!(check_update_allowed(&editor, &theirs, &retitle).is_ok());
    }

    #[test]
    fn assignee_is_refused_when_tasks_module_is_off() {
        let ctx = test_context(false, &["tasks.read"], &[]);
        let mine = task(Some(ctx.user_id));
        let status_only = UpdateTaskRequest {
            status: Some(TaskStatus::Done),
            ..Default::default()
        };
        assert!(matches!(
            check_update_allowed(&ctx, &mine, &status_only),
            Err(ServiceError::Forbidden(msg)) if msg.contains("not enabled")
        ));
    }

    #[test]
    fn mine_filter_overrides_assignee() {
        let ctx = context(&["tasks.read"]);
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM tasks");
        push_where(
            &mut qb,
            &ctx,
            &TaskQuery {
                assignee_id: Some(Uuid::new_v4()),
                status: Some(TaskStatus::Todo),
                mine: true,
                ..Default::default()
            },
        );
        assert_eq!(
            qb.sql(),
            "SELECT COUNT(*) FROM tasks WHERE deleted_at IS NULL AND tenant_id = $1 AND assignee_id = $2 AND status = $3"
        );
    }

    #[test]
    fn not_found_reference_becomes_field_error() {
        let err = field_not_found(ServiceError::not_found("Event"), "event_id", "missing");
        assert!(matches!(err, ServiceError::Validation(e) if e.get("event_id") == Some("missing")));
        let err = field_not_found(ServiceError::Forbidden("no".into()), "event_id", "missing");
        assert!(matches!(err, ServiceError::Forbidden(_)));
    }
}
