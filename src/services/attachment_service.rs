use std::sync::Arc;

use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::models::Attachment;
use crate::services::{AccessContext, ServiceError};
use crate::storage::{compute_checksum, sanitize_file_name, storage_path, verify_checksum, StorageBackend};
use crate::types::OwnerType;
use crate::validation::FieldErrors;

const ATTACHMENT_COLUMNS: &str = "id, tenant_id, owner_type, owner_id, file_name, content_type, size_bytes, \
                                  checksum, storage_path, uploaded_by, created_at";

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// A fully received upload, ready to be stored
#[derive(Debug)]
pub struct NewUpload {
    pub owner_type: OwnerType,
    pub owner_id: Uuid,
    pub file_name: String,
    pub content_type: Option<String>,
    pub data: Vec<u8>,
}

#[derive(Debug, Deserialize)]
pub struct AttachmentQuery {
    pub owner_type: OwnerType,
    pub owner_id: Uuid,
}

pub struct AttachmentService {
    pool: PgPool,
    storage: Arc<dyn StorageBackend>,
    max_upload_bytes: usize,
}

impl AttachmentService {
    pub fn new(pool: PgPool, storage: Arc<dyn StorageBackend>, max_upload_bytes: usize) -> Self {
        Self {
            pool,
            storage,
            max_upload_bytes,
        }
    }

    /// Hash the content, write the blob if this tenant does not hold it yet,
    /// then record the attachment row.
    pub async fn upload(&self, ctx: &AccessContext, upload: NewUpload) -> Result<Attachment, ServiceError> {
        ctx.require("attachments.create")?;
        check_size(upload.data.len(), self.max_upload_bytes)?;
        self.ensure_owner(ctx.tenant_id(), upload.owner_type, upload.owner_id).await?;

        let checksum = compute_checksum(&upload.data);
        let path = storage_path(ctx.tenant_id(), &checksum);
        let written = self.storage.put(&path, &upload.data).await?;

        let file_name = sanitize_file_name(&upload.file_name);
        let content_type = upload
            .content_type
            .as_deref()
            .map(str::trim)
            .filter(|ct| !ct.is_empty())
            .unwrap_or(DEFAULT_CONTENT_TYPE);

        let sql = format!(
            r#"
            INSERT INTO attachments (id, tenant_id, owner_type, owner_id, file_name, content_type,
                                     size_bytes, checksum, storage_path, uploaded_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {}
            "#,
            ATTACHMENT_COLUMNS
        );
        let attachment = sqlx::query_as::<_, Attachment>(&sql)
            .bind(Uuid::new_v4())
            .bind(ctx.tenant_id())
            .bind(upload.owner_type.as_str())
            .bind(upload.owner_id)
            .bind(&file_name)
            .bind(content_type)
            .bind(upload.data.len() as i64)
            .bind(&checksum)
            .bind(&path)
            .bind(ctx.user_id)
            .fetch_one(&self.pool)
            .await?;

        tracing::info!(
            tenant = %ctx.tenant.slug,
            attachment = %attachment.id,
            size = attachment.size_bytes,
            deduplicated = !written,
            "Attachment uploaded"
        );
        Ok(attachment)
    }

    pub async fn list(&self, ctx: &AccessContext, query: &AttachmentQuery) -> Result<Vec<Attachment>, ServiceError> {
        ctx.require("attachments.read")?;

        let sql = format!(
            r#"
            SELECT {}
            FROM attachments
            WHERE tenant_id = $1 AND owner_type = $2 AND owner_id = $3 AND deleted_at IS NULL
            ORDER BY created_at DESC
            "#,
            ATTACHMENT_COLUMNS
        );
        let items = sqlx::query_as::<_, Attachment>(&sql)
            .bind(ctx.tenant_id())
            .bind(query.owner_type.as_str())
            .bind(query.owner_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(items)
    }

    pub async fn get(&self, ctx: &AccessContext, id: Uuid) -> Result<Attachment, ServiceError> {
        ctx.require("attachments.read")?;
        self.find(ctx.tenant_id(), id).await
    }

    /// Metadata plus blob content, re-verified against the recorded checksum.
    pub async fn download(&self, ctx: &AccessContext, id: Uuid) -> Result<(Attachment, Vec<u8>), ServiceError> {
        let attachment = self.get(ctx, id).await?;
        let data = self.storage.get(&attachment.storage_path).await?;
        verify_checksum(&attachment.storage_path, &data, &attachment.checksum)?;
        Ok((attachment, data))
    }

    /// Soft delete; the blob stays because other rows may share it.
    pub async fn delete(&self, ctx: &AccessContext, id: Uuid) -> Result<(), ServiceError> {
        let attachment = self.find(ctx.tenant_id(), id).await?;
        check_delete_allowed(ctx, attachment.uploaded_by)?;

        sqlx::query("UPDATE attachments SET deleted_at = now() WHERE tenant_id = $1 AND id = $2")
            .bind(ctx.tenant_id())
            .bind(id)
            .execute(&self.pool)
            .await?;

        tracing::info!(tenant = %ctx.tenant.slug, attachment = %id, "Attachment deleted");
        Ok(())
    }

    async fn find(&self, tenant_id: Uuid, id: Uuid) -> Result<Attachment, ServiceError> {
        let sql = format!(
            "SELECT {} FROM attachments WHERE tenant_id = $1 AND id = $2 AND deleted_at IS NULL",
            ATTACHMENT_COLUMNS
        );
        sqlx::query_as::<_, Attachment>(&sql)
            .bind(tenant_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ServiceError::not_found("Attachment"))
    }

    async fn ensure_owner(&self, tenant_id: Uuid, owner_type: OwnerType, owner_id: Uuid) -> Result<(), ServiceError> {
        // Table name comes from OwnerType::table, never from the request
        let sql = format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE tenant_id = $1 AND id = $2 AND deleted_at IS NULL)",
            owner_type.table()
        );
        let exists: bool = sqlx::query_scalar(&sql)
            .bind(tenant_id)
            .bind(owner_id)
            .fetch_one(&self.pool)
            .await?;

        if !exists {
            let mut errors = FieldErrors::new();
            errors.add("owner_id", format!("No {} with this id in the tenant", owner_type));
            return Err(ServiceError::Validation(errors));
        }
        Ok(())
    }
}

fn check_size(len: usize, max: usize) -> Result<(), ServiceError> {
    if len == 0 {
        return Err(ServiceError::BadRequest("Uploaded file is empty".to_string()));
    }
    if len > max {
        return Err(ServiceError::PayloadTooLarge(format!(
            "File exceeds the upload limit of {} bytes",
            max
        )));
    }
    Ok(())
}

/// `Content-Disposition` value for a stored file name.
pub fn content_disposition(file_name: &str) -> String {
    let ascii: String = file_name
        .chars()
        .map(|c| if c.is_ascii() && !c.is_ascii_control() && c != '"' && c != '\\' { c } else { '_' })
        .collect();
    format!("attachment; filename=\"{}\"", ascii)
}

/// The uploader may remove their own file; anyone else needs `attachments.delete`.
fn check_delete_allowed(ctx: &AccessContext, uploaded_by: Uuid) -> Result<(), ServiceError> {
    if uploaded_by == ctx.user_id && ctx.module_enabled("attachments") {
        return Ok(());
    }
    ctx.require("attachments.delete")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::rbac_service::test_context;

    #[test]
    fn uploader_or_delete_permission_removes_attachment() {
        let uploader = test_context(false, &["attachments.create"], &["attachments"]);
        assert!(check_delete_allowed(&uploader, uploader.user_id).is_ok());
        assert!(check_delete_allowed(&uploader, Uuid::new_v4()).is_err());

        // No read key needed alongside delete
        let cleaner = test_context(false, &["attachments.delete"], &["attachments"]);
        assert!(check_delete_allowed(&cleaner, Uuid::new_v4()).is_ok());

        let disabled = test_context(false, &["attachments.delete"], &[]);
        assert!(check_delete_allowed(&disabled, disabled.user_id).is_err());
    }

    #[test]
    fn rejects_empty_and_oversized_uploads() {
        assert!(matches!(check_size(0, 10), Err(ServiceError::BadRequest(_))));
        assert!(matches!(check_size(11, 10), Err(ServiceError::PayloadTooLarge(_))));
        assert!(check_size(10, 10).is_ok());
    }

    #[test]
    fn disposition_is_quoted_ascii() {
        assert_eq!(content_disposition("plan.pdf"), "attachment; filename=\"plan.pdf\"");
        assert_eq!(content_disposition("café \"v2\".pdf"), "attachment; filename=\"caf_ _v2_.pdf\"");
    }

    #[test]
    fn query_parses_owner_type() {
        let q: AttachmentQuery = serde_json::from_str(
            r#"{"owner_type":"task","owner_id":"6f1c4b1e-2b7d-4f7e-9a51-0c8d9f1b2a33"}"#,
        )
        .unwrap();
        assert_eq!(q.owner_type, OwnerType::Task);
    }
}
