// handlers/protected/feedback.rs - /api/events/:id/feedback

use axum::{extract::State, Extension};
use uuid::Uuid;

use crate::app::AppState;
use crate::database::models::Feedback;
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::feedback_service::{FeedbackListing, SubmitFeedbackRequest};
use crate::services::{AccessContext, FeedbackService};
use crate::validation::{ValidatedJson, ValidatedPath};

pub async fn feedback_get(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    ValidatedPath(event_id): ValidatedPath<Uuid>,
) -> ApiResult<FeedbackListing> {
    let listing = FeedbackService::new(state.pool).list(&ctx, event_id).await?;
    Ok(ApiResponse::success(listing))
}

/// POST /api/events/:id/feedback - upsert the caller's rating
pub async fn feedback_post(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    ValidatedPath(event_id): ValidatedPath<Uuid>,
    ValidatedJson(req): ValidatedJson<SubmitFeedbackRequest>,
) -> ApiResult<Feedback> {
    let feedback = FeedbackService::new(state.pool).submit(&ctx, event_id, &req).await?;
    Ok(ApiResponse::success(feedback))
}

/// DELETE /api/events/:id/feedback - withdraw the caller's own feedback
pub async fn feedback_delete(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    ValidatedPath(event_id): ValidatedPath<Uuid>,
) -> ApiResult<()> {
    FeedbackService::new(state.pool).delete_own(&ctx, event_id).await?;
    Ok(ApiResponse::no_content())
}
