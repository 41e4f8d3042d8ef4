use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::database::models::{Feedback, FeedbackSummary};
use crate::services::{AccessContext, EventService, ServiceError};
use crate::validation::{FieldErrors, Validate};

const FEEDBACK_SELECT: &str = r#"
    SELECT f.id, f.event_id, f.author_id, u.name AS author_name, f.rating, f.comment,
           f.created_at, f.updated_at
    FROM feedback f
    JOIN users u ON u.id = f.author_id
"#;

#[derive(Debug, Deserialize)]
pub struct SubmitFeedbackRequest {
    pub rating: i16,
    pub comment: Option<String>,
}

impl Validate for SubmitFeedbackRequest {
    fn validate(&self) -> Result<(), ServiceError> {
        let mut errors = FieldErrors::new();
        errors.check((1..=5).contains(&self.rating), "rating", "Rating must be between 1 and 5");
        errors.optional_text("comment", self.comment.as_deref(), 5_000);
        errors.into_result()
    }
}

#[derive(Debug, Serialize)]
pub struct FeedbackListing {
    pub items: Vec<Feedback>,
    pub summary: FeedbackSummary,
}

pub struct FeedbackService {
    pool: PgPool,
}

impl FeedbackService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create or replace the caller's feedback on an event.
    pub async fn submit(
        &self,
        ctx: &AccessContext,
        event_id: Uuid,
        req: &SubmitFeedbackRequest,
    ) -> Result<Feedback, ServiceError> {
        ctx.require("feedback.write")?;
        let event = EventService::new(self.pool.clone()).find(ctx.tenant_id(), event_id).await?;
        if !event.status.accepts_feedback() {
            return Err(ServiceError::Unprocessable(format!(
                "Feedback is not accepted for {} events",
                event.status
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO feedback (id, tenant_id, event_id, author_id, rating, comment)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (event_id, author_id)
            DO UPDATE SET rating = EXCLUDED.rating, comment = EXCLUDED.comment, updated_at = now()
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(ctx.tenant_id())
        .bind(event_id)
        .bind(ctx.user_id)
        .bind(req.rating)
        .bind(req.comment.as_deref().map(str::trim))
        .execute(&self.pool)
        .await?;

        tracing::info!(event = %event_id, rating = req.rating, "Feedback submitted");

        let sql = format!("{} WHERE f.event_id = $1 AND f.author_id = $2", FEEDBACK_SELECT);
        let feedback = sqlx::query_as::<_, Feedback>(&sql)
            .bind(event_id)
            .bind(ctx.user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(feedback)
    }

    pub async fn list(&self, ctx: &AccessContext, event_id: Uuid) -> Result<FeedbackListing, ServiceError> {
        ctx.require("feedback.read")?;
        EventService::new(self.pool.clone()).find(ctx.tenant_id(), event_id).await?;

        let sql = format!("{} WHERE f.event_id = $1 ORDER BY f.created_at DESC", FEEDBACK_SELECT);
        let items = sqlx::query_as::<_, Feedback>(&sql)
            .bind(event_id)
            .fetch_all(&self.pool)
            .await?;

        let summary = sqlx::query_as::<_, FeedbackSummary>(
            "SELECT COUNT(*) AS count, AVG(rating)::float8 AS average_rating FROM feedback WHERE event_id = $1",
        )
        .bind(event_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(FeedbackListing { items, summary })
    }

    /// Remove the caller's own feedback on an event. Needs the same key as
    /// submitting it.
    pub async fn delete_own(&self, ctx: &AccessContext, event_id: Uuid) -> Result<(), ServiceError> {
        ctx.require("feedback.write")?;
        EventService::new(self.pool.clone()).find(ctx.tenant_id(), event_id).await?;

        let deleted = sqlx::query("DELETE FROM feedback WHERE event_id = $1 AND author_id = $2")
            .bind(event_id)
            .bind(ctx.user_id)
            .execute(&self.pool)
            .await?;

        if deleted.rows_affected() == 0 {
            return Err(ServiceError::not_found("Feedback"));
        }
        Ok(())
    }
}
