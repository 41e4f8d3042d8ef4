// handlers/protected/events.rs - /api/events

use axum::{extract::State, Extension};
use uuid::Uuid;

use crate::app::AppState;
use crate::config;
use crate::database::models::Event;
use crate::filter::{ListParams, Page};
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::event_service::{ChangeStatusRequest, CreateEventRequest, EventQuery, UpdateEventRequest};
use crate::services::{AccessContext, EventService};
use crate::validation::{ValidatedJson, ValidatedPath, ValidatedQuery};

/// GET /api/events - filters: status, venue_id, from, to, search
pub async fn events_get(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    ValidatedQuery(params): ValidatedQuery<ListParams>,
    ValidatedQuery(query): ValidatedQuery<EventQuery>,
) -> ApiResult<Page<Event>> {
    let page = EventService::new(state.pool)
        .list(&ctx, &config::config().api, &params, &query)
        .await?;
    Ok(ApiResponse::success(page))
}

/// POST /api/events - new events start as drafts
pub async fn events_post(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    ValidatedJson(req): ValidatedJson<CreateEventRequest>,
) -> ApiResult<Event> {
    let event = EventService::new(state.pool).create(&ctx, &req).await?;
    Ok(ApiResponse::created(event))
}

pub async fn event_get(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    ValidatedPath(id): ValidatedPath<Uuid>,
) -> ApiResult<Event> {
    let event = EventService::new(state.pool).get(&ctx, id).await?;
    Ok(ApiResponse::success(event))
}

pub async fn event_patch(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    ValidatedPath(id): ValidatedPath<Uuid>,
    ValidatedJson(req): ValidatedJson<UpdateEventRequest>,
) -> ApiResult<Event> {
    let event = EventService::new(state.pool).update(&ctx, id, &req).await?;
    Ok(ApiResponse::success(event))
}

pub async fn event_delete(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    ValidatedPath(id): ValidatedPath<Uuid>,
) -> ApiResult<()> {
    EventService::new(state.pool).delete(&ctx, id).await?;
    Ok(ApiResponse::no_content())
}

/// POST /api/events/:id/status - lifecycle transition; 422 when not allowed
pub async fn event_status_post(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    ValidatedPath(id): ValidatedPath<Uuid>,
    ValidatedJson(req): ValidatedJson<ChangeStatusRequest>,
) -> ApiResult<Event> {
    let event = EventService::new(state.pool).change_status(&ctx, id, req.status).await?;
    Ok(ApiResponse::success(event))
}
