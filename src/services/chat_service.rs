use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::config::ApiConfig;
use crate::database::models::ChatMessage;
use crate::services::{AccessContext, DepartmentService, ServiceError};
use crate::validation::{FieldErrors, Validate};

pub const MAX_MESSAGE_CHARS: usize = 4000;

const MESSAGE_SELECT: &str = r#"
    SELECT c.id, c.department_id, c.author_id, u.name AS author_name, c.body, c.created_at, c.edited_at
    FROM chat_messages c
    JOIN users u ON u.id = c.author_id
"#;

#[derive(Debug, Deserialize)]
pub struct PostMessageRequest {
    pub body: String,
}

impl Validate for PostMessageRequest {
    fn validate(&self) -> Result<(), ServiceError> {
        let mut errors = FieldErrors::new();
        errors.required_text("body", &self.body, MAX_MESSAGE_CHARS);
        errors.into_result()
    }
}

/// Cursor paging, newest first. `before` is the id of the last message of
/// the previous page; ordering is by `(created_at, id)` so messages sharing a
/// timestamp are neither skipped nor repeated.
#[derive(Debug, Default, Deserialize)]
pub struct MessageQuery {
    pub before: Option<Uuid>,
    pub limit: Option<i64>,
}

impl MessageQuery {
    fn resolved_limit(&self, api: &ApiConfig) -> Result<i64, ServiceError> {
        match self.limit {
            None => Ok(api.default_page_size),
            Some(l) if l < 1 => Err(ServiceError::BadRequest("Limit must be at least 1".to_string())),
            Some(l) => Ok(l.min(api.max_page_size)),
        }
    }
}

pub struct ChatService {
    pool: PgPool,
}

impl ChatService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn departments(&self) -> DepartmentService {
        DepartmentService::new(self.pool.clone())
    }

    pub async fn list(
        &self,
        ctx: &AccessContext,
        api: &ApiConfig,
        department_id: Uuid,
        query: &MessageQuery,
    ) -> Result<Vec<ChatMessage>, ServiceError> {
        ctx.require("chat.read")?;
        self.departments().assert_member(ctx, department_id, ctx.user_id).await?;
        let limit = query.resolved_limit(api)?;
        let cursor = match query.before {
            Some(id) => Some(self.cursor(department_id, id).await?),
            None => None,
        };

        let sql = format!(
            r#"{}
            WHERE c.department_id = $1
              AND c.deleted_at IS NULL
              AND ($2::timestamptz IS NULL OR (c.created_at, c.id) < ($2::timestamptz, $3::uuid))
            ORDER BY c.created_at DESC, c.id DESC
            LIMIT $4
            "#,
            MESSAGE_SELECT
        );
        let messages = sqlx::query_as::<_, ChatMessage>(&sql)
            .bind(department_id)
            .bind(cursor.map(|(at, _)| at))
            .bind(cursor.map(|(_, id)| id))
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(messages)
    }

    /// Position of the cursor message; deleted messages still mark a position.
    async fn cursor(&self, department_id: Uuid, message_id: Uuid) -> Result<(DateTime<Utc>, Uuid), ServiceError> {
        sqlx::query_as::<_, (DateTime<Utc>, Uuid)>(
            "SELECT created_at, id FROM chat_messages WHERE department_id = $1 AND id = $2",
        )
        .bind(department_id)
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| ServiceError::BadRequest("Unknown 'before' cursor".to_string()))
    }

    pub async fn post(
        &self,
        ctx: &AccessContext,
        department_id: Uuid,
        req: &PostMessageRequest,
    ) -> Result<ChatMessage, ServiceError> {
        ctx.require("chat.write")?;
        self.departments().assert_member(ctx, department_id, ctx.user_id).await?;

        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO chat_messages (id, tenant_id, department_id, author_id, body)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(id)
        .bind(ctx.tenant_id())
        .bind(department_id)
        .bind(ctx.user_id)
        .bind(req.body.trim())
        .execute(&self.pool)
        .await?;

        tracing::debug!(department = %department_id, message = %id, "Chat message posted");
        self.find(ctx.tenant_id(), department_id, id).await
    }

    /// Authors may edit their own messages only.
    pub async fn edit(
        &self,
        ctx: &AccessContext,
        department_id: Uuid,
        message_id: Uuid,
        req: &PostMessageRequest,
    ) -> Result<ChatMessage, ServiceError> {
        ctx.require("chat.write")?;
        let message = self.find(ctx.tenant_id(), department_id, message_id).await?;
        if message.author_id != ctx.user_id {
            return Err(ServiceError::Forbidden("Only the author can edit a message".to_string()));
        }

        sqlx::query("UPDATE chat_messages SET body = $2, edited_at = now() WHERE id = $1")
            .bind(message_id)
            .bind(req.body.trim())
            .execute(&self.pool)
            .await?;

        self.find(ctx.tenant_id(), department_id, message_id).await
    }

    /// Authors delete their own messages; department admins delete any.
    pub async fn delete(&self, ctx: &AccessContext, department_id: Uuid, message_id: Uuid) -> Result<(), ServiceError> {
        let message = self.find(ctx.tenant_id(), department_id, message_id).await?;
        if !author_may_delete(ctx, message.author_id)? {
            self.departments().assert_admin(ctx, department_id, ctx.user_id).await?;
        }

        sqlx::query("UPDATE chat_messages SET deleted_at = now() WHERE id = $1")
            .bind(message_id)
            .execute(&self.pool)
            .await?;

        tracing::info!(department = %department_id, message = %message_id, "Chat message deleted");
        Ok(())
    }

    async fn find(&self, tenant_id: Uuid, department_id: Uuid, message_id: Uuid) -> Result<ChatMessage, ServiceError> {
        let sql = format!(
            r#"{}
            WHERE c.tenant_id = $1 AND c.department_id = $2 AND c.id = $3 AND c.deleted_at IS NULL
            "#,
            MESSAGE_SELECT
        );
        sqlx::query_as::<_, ChatMessage>(&sql)
            .bind(tenant_id)
            .bind(department_id)
            .bind(message_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ServiceError::not_found("Message"))
    }
}

/// `Ok(true)` when the caller removes their own message; `Ok(false)` when
/// department admin rights must be checked instead.
fn author_may_delete(ctx: &AccessContext, author_id: Uuid) -> Result<bool, ServiceError> {
    if !ctx.module_enabled("chat") {
        ctx.require("chat.write")?;
    }
    if author_id == ctx.user_id {
        ctx.require("chat.write")?;
        return Ok(true);
    }
    Ok(false)
}
