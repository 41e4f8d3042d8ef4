// handlers/protected/attachments.rs - /api/attachments

use axum::{
    extract::{multipart::MultipartError, Multipart, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Extension,
};
use uuid::Uuid;

use crate::app::AppState;
use crate::database::models::Attachment;
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult};
use crate::services::attachment_service::{content_disposition, AttachmentQuery, NewUpload};
use crate::services::{AccessContext, AttachmentService};
use crate::types::OwnerType;
use crate::validation::{FieldErrors, ValidatedPath, ValidatedQuery};

fn service(state: AppState) -> AttachmentService {
    let max_upload_bytes = state.max_upload_bytes;
    AttachmentService::new(state.pool, state.storage, max_upload_bytes)
}

/// GET /api/attachments?owner_type=&owner_id=
pub async fn attachments_get(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    ValidatedQuery(query): ValidatedQuery<AttachmentQuery>,
) -> ApiResult<Vec<Attachment>> {
    let items = service(state).list(&ctx, &query).await?;
    Ok(ApiResponse::success(items))
}

/// POST /api/attachments - multipart fields `owner_type`, `owner_id`, `file`
pub async fn attachments_post(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    mut multipart: Multipart,
) -> ApiResult<Attachment> {
    let max_upload_bytes = state.max_upload_bytes;
    let mut owner_type: Option<String> = None;
    let mut owner_id: Option<String> = None;
    let mut file: Option<(String, Option<String>, Vec<u8>)> = None;

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        match field.name().unwrap_or_default() {
            "owner_type" => owner_type = Some(field.text().await.map_err(multipart_error)?),
            "owner_id" => owner_id = Some(field.text().await.map_err(multipart_error)?),
            "file" => {
                let file_name = field.file_name().unwrap_or("file").to_string();
                let content_type = field.content_type().map(str::to_string);
                let mut data = Vec::new();
                // Stop reading as soon as the limit is crossed
                while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
                    if data.len() + chunk.len() > max_upload_bytes {
                        return Err(ApiError::payload_too_large(format!(
                            "File exceeds the upload limit of {} bytes",
                            max_upload_bytes
                        )));
                    }
                    data.extend_from_slice(&chunk);
                }
                file = Some((file_name, content_type, data));
            }
            other => tracing::debug!(field = other, "Ignoring unknown multipart field"),
        }
    }

    let upload = build_upload(owner_type, owner_id, file)?;
    let attachment = service(state).upload(&ctx, upload).await?;
    Ok(ApiResponse::created(attachment))
}

pub async fn attachment_get(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    ValidatedPath(id): ValidatedPath<Uuid>,
) -> ApiResult<Attachment> {
    let attachment = service(state).get(&ctx, id).await?;
    Ok(ApiResponse::success(attachment))
}

/// GET /api/attachments/:id/content - raw bytes after checksum verification
pub async fn attachment_content_get(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    ValidatedPath(id): ValidatedPath<Uuid>,
) -> Result<Response, ApiError> {
    let (attachment, data) = service(state).download(&ctx, id).await?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, attachment.content_type.clone()),
            (header::CONTENT_DISPOSITION, content_disposition(&attachment.file_name)),
            (header::ETAG, format!("\"{}\"", attachment.checksum)),
        ],
        data,
    )
        .into_response())
}

/// DELETE /api/attachments/:id - soft delete; the blob is kept
pub async fn attachment_delete(
    State(state): State<AppState>,
    Extension(ctx): Extension<AccessContext>,
    ValidatedPath(id): ValidatedPath<Uuid>,
) -> ApiResult<()> {
    service(state).delete(&ctx, id).await?;
    Ok(ApiResponse::no_content())
}

fn build_upload(
    owner_type: Option<String>,
    owner_id: Option<String>,
    file: Option<(String, Option<String>, Vec<u8>)>,
) -> Result<NewUpload, ApiError> {
    let mut errors = FieldErrors::new();

    let owner_type = match owner_type.as_deref().map(str::parse::<OwnerType>) {
        Some(Ok(t)) => Some(t),
        Some(Err(_)) => {
            errors.add("owner_type", "Must be one of: event, task, department");
            None
        }
        None => {
            errors.add("owner_type", "This field is required");
            None
        }
    };
    let owner_id = match owner_id.as_deref().map(|s| Uuid::parse_str(s.trim())) {
        Some(Ok(id)) => Some(id),
        Some(Err(_)) => {
            errors.add("owner_id", "Must be a UUID");
            None
        }
        None => {
            errors.add("owner_id", "This field is required");
            None
        }
    };
    if file.is_none() {
        errors.add("file", "This field is required");
    }

    match (owner_type, owner_id, file) {
        (Some(owner_type), Some(owner_id), Some((file_name, content_type, data))) if errors.is_empty() => {
            Ok(NewUpload {
                owner_type,
                owner_id,
                file_name,
                content_type,
                data,
            })
        }
        _ => Err(ApiError::validation_error("Validation failed", Some(errors.into_inner()))),
    }
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::payload_too_large(err.body_text())
    } else {
        ApiError::bad_request(err.body_text())
    }
}
