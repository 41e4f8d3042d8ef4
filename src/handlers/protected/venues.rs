// handlers/protected/venues.rs - /api/venues

use axum::{extract::State, Extension};
use uuid::Uuid;

use crate::app::AppState;
use crate::config;
use crate::database::models::Venue;
use crate::filter::{ListParams, Page};
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::venue_service::{CreateVenueRequest, UpdateVenueRequest, VenueQuery};
use crate::services::{AccessContext, VenueService};
use crate::validation::{ValidatedJson, ValidatedPath, ValidatedQuery};

pub async fn venues_get(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    ValidatedQuery(params): ValidatedQuery<ListParams>,
    ValidatedQuery(query): ValidatedQuery<VenueQuery>,
) -> ApiResult<Page<Venue>> {
    let page = VenueService::new(state.pool)
        .list(&ctx, &config::config().api, &params, &query)
        .await?;
    Ok(ApiResponse::success(page))
}

pub async fn venues_post(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    ValidatedJson(req): ValidatedJson<CreateVenueRequest>,
) -> ApiResult<Venue> {
    let venue = VenueService::new(state.pool).create(&ctx, &req).await?;
    Ok(ApiResponse::created(venue))
}

pub async fn venue_get(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    ValidatedPath(id): ValidatedPath<Uuid>,
) -> ApiResult<Venue> {
    let venue = VenueService::new(state.pool).get(&ctx, id).await?;
    Ok(ApiResponse::success(venue))
}

pub async fn venue_patch(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    ValidatedPath(id): ValidatedPath<Uuid>,
    ValidatedJson(req): ValidatedJson<UpdateVenueRequest>,
) -> ApiResult<Venue> {
    let venue = VenueService::new(state.pool).update(&ctx, id, &req).await?;
    Ok(ApiResponse::success(venue))
}

/// DELETE /api/venues/:id - 409 while events still reference the venue
pub async fn venue_delete(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    ValidatedPath(id): ValidatedPath<Uuid>,
) -> ApiResult<()> {
    VenueService::new(state.pool).delete(&ctx, id).await?;
    Ok(ApiResponse::no_content())
}
