// handlers/protected/chat.rs - /api/departments/:id/messages

use axum::{extract::State, Extension};
use uuid::Uuid;

use crate::app::AppState;
use crate::config;
use crate::database::models::ChatMessage;
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::chat_service::{MessageQuery, PostMessageRequest};
use crate::services::{AccessContext, ChatService};
use crate::validation::{ValidatedJson, ValidatedPath, ValidatedQuery};

/// GET /api/departments/:id/messages?before=&limit= - newest first
pub async fn messages_get(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    ValidatedPath(department_id): ValidatedPath<Uuid>,
    ValidatedQuery(query): ValidatedQuery<MessageQuery>,
) -> ApiResult<Vec<ChatMessage>> {
    let messages = ChatService::new(state.pool)
        .list(&ctx, &config::config().api, department_id, &query)
        .await?;
    Ok(ApiResponse::success(messages))
}

pub async fn messages_post(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    ValidatedPath(department_id): ValidatedPath<Uuid>,
    ValidatedJson(req): ValidatedJson<PostMessageRequest>,
) -> ApiResult<ChatMessage> {
    let message = ChatService::new(state.pool).post(&ctx, department_id, &req).await?;
    Ok(ApiResponse::created(message))
}

pub async fn message_patch(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    ValidatedPath((department_id, message_id)): ValidatedPath<(Uuid, Uuid)>,
    ValidatedJson(req): ValidatedJson<PostMessageRequest>,
) -> ApiResult<ChatMessage> {
    let message = ChatService::new(state.pool)
        .edit(&ctx, department_id, message_id, &req)
        .await?;
    Ok(ApiResponse::success(message))
}

pub async fn message_delete(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    ValidatedPath((department_id, message_id)): ValidatedPath<(Uuid, Uuid)>,
) -> ApiResult<()> {
    ChatService::new(state.pool).delete(&ctx, department_id, message_id).await?;
    Ok(ApiResponse::no_content())
}
