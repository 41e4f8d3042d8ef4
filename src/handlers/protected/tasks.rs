// handlers/protected/tasks.rs - /api/tasks

use axum::{extract::State, Extension};
use uuid::Uuid;

use crate::app::AppState;
use crate::config;
use crate::database::models::Task;
use crate::filter::{ListParams, Page};
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::task_service::{CreateTaskRequest, TaskQuery, UpdateTaskRequest};
use crate::services::{AccessContext, TaskService};
use crate::validation::{ValidatedJson, ValidatedPath, ValidatedQuery};

/// GET /api/tasks - filters: event_id, department_id, assignee_id, status, mine
pub async fn tasks_get(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    ValidatedQuery(params): ValidatedQuery<ListParams>,
    ValidatedQuery(query): ValidatedQuery<TaskQuery>,
) -> ApiResult<Page<Task>> {
    let page = TaskService::new(state.pool)
        .list(&ctx, &config::config().api, &params, &query)
        .await?;
    Ok(ApiResponse::success(page))
}

pub async fn tasks_post(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    ValidatedJson(req): ValidatedJson<CreateTaskRequest>,
) -> ApiResult<Task> {
    let task = TaskService::new(state.pool).create(&ctx, &req).await?;
    Ok(ApiResponse::created(task))
}

pub async fn task_get(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    ValidatedPath(id): ValidatedPath<Uuid>,
) -> ApiResult<Task> {
    let task = TaskService::new(state.pool).get(&ctx, id).await?;
    Ok(ApiResponse::success(task))
}

pub async fn task_patch(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    ValidatedPath(id): ValidatedPath<Uuid>,
    ValidatedJson(req): ValidatedJson<UpdateTaskRequest>,
) -> ApiResult<Task> {
    let task = TaskService::new(state.pool).update(&ctx, id, &req).await?;
    Ok(ApiResponse::success(task))
}

pub async fn task_delete(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    ValidatedPath(id): ValidatedPath<Uuid>,
) -> ApiResult<()> {
    TaskService::new(state.pool).delete(&ctx, id).await?;
    Ok(ApiResponse::no_content())
}
