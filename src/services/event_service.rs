use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::config::ApiConfig;
use crate::database::models::Event;
use crate::filter::{contains_pattern, ListFilter, ListParams, Page};
use crate::services::{AccessContext, ServiceError, VenueService};
use crate::types::EventStatus;
use crate::validation::{FieldErrors, Validate};

pub const EVENT_ORDER_COLUMNS: &[&str] = &["starts_at", "ends_at", "name", "status", "created_at"];

const EVENT_COLUMNS: &str =
    "id, tenant_id, venue_id, name, description, status, starts_at, ends_at, created_by, created_at, updated_at";

#[derive(Debug, Deserialize)]
pub struct CreateEventRequest {
    pub name: String,
    pub description: Option<String>,
    pub venue_id: Option<Uuid>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

impl Validate for CreateEventRequest {
    fn validate(&self) -> Result<(), ServiceError> {
        let mut errors = FieldErrors::new();
        errors.required_text("name", &self.name, 200);
        errors.optional_text("description", self.description.as_deref(), 10_000);
        check_window(&mut errors, self.starts_at, self.ends_at);
        errors.into_result()
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateEventRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    pub venue_id: Option<Uuid>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
}

impl Validate for UpdateEventRequest {
    fn validate(&self) -> Result<(), ServiceError> {
        let mut errors = FieldErrors::new();
        errors.optional_text("name", self.name.as_deref(), 200);
        errors.optional_text("description", self.description.as_deref(), 10_000);
        if let (Some(starts_at), Some(ends_at)) = (self.starts_at, self.ends_at) {
            check_window(&mut errors, starts_at, ends_at);
        }
        errors.into_result()
    }
}

#[derive(Debug, Deserialize)]
pub struct ChangeStatusRequest {
    pub status: EventStatus,
}

impl Validate for ChangeStatusRequest {
    fn validate(&self) -> Result<(), ServiceError> {
        Ok(())
    }
}

fn check_window(errors: &mut FieldErrors, starts_at: DateTime<Utc>, ends_at: DateTime<Utc>) {
    errors.check(ends_at >= starts_at, "ends_at", "Must not be before starts_at");
}

#[derive(Debug, Default, Deserialize)]
pub struct EventQuery {
    pub status: Option<EventStatus>,
    pub venue_id: Option<Uuid>,
    /// Events ending at or after this instant
    pub from: Option<DateTime<Utc>>,
    /// Events starting at or before this instant
    pub to: Option<DateTime<Utc>>,
    pub search: Option<String>,
}

pub struct EventService {
    pool: PgPool,
}

impl EventService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn list(
        &self,
        ctx: &AccessContext,
        api: &ApiConfig,
        params: &ListParams,
        query: &EventQuery,
    ) -> Result<Page<Event>, ServiceError> {
        ctx.require("events.read")?;
        let filter = ListFilter::from_params(params, api, EVENT_ORDER_COLUMNS, "starts_at")?;

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM events");
        push_where(&mut count, ctx.tenant_id(), query);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::<Postgres>::new(format!("SELECT {} FROM events", EVENT_COLUMNS));
        push_where(&mut select, ctx.tenant_id(), query);
        filter.push_tail(&mut select);
        let items = select.build_query_as::<Event>().fetch_all(&self.pool).await?;

        Ok(filter.page(items, total))
    }

    pub async fn get(&self, ctx: &AccessContext, id: Uuid) -> Result<Event, ServiceError> {
        ctx.require("events.read")?;
        self.find(ctx.tenant_id(), id).await
    }

    pub async fn create(&self, ctx: &AccessContext, req: &CreateEventRequest) -> Result<Event, ServiceError> {
        ctx.require("events.create")?;
        if let Some(venue_id) = req.venue_id {
            self.ensure_venue(ctx, venue_id).await?;
        }

        let sql = format!(
            r#"
            INSERT INTO events (id, tenant_id, venue_id, name, description, status, starts_at, ends_at, created_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {}
            "#,
            EVENT_COLUMNS
        );
        let event = sqlx::query_as::<_, Event>(&sql)
            .bind(Uuid::new_v4())
            .bind(ctx.tenant_id())
            .bind(req.venue_id)
            .bind(req.name.trim())
            .bind(req.description.as_deref())
            .bind(EventStatus::Draft.as_str())
            .bind(req.starts_at)
            .bind(req.ends_at)
            .bind(ctx.user_id)
            .fetch_one(&self.pool)
            .await?;

        tracing::info!(tenant = %ctx.tenant.slug, event = %event.id, "Event created");
        Ok(event)
    }

    pub async fn update(&self, ctx: &AccessContext, id: Uuid, req: &UpdateEventRequest) -> Result<Event, ServiceError> {
        ctx.require("events.update")?;
        let current = self.find(ctx.tenant_id(), id).await?;

        let starts_at = req.starts_at.unwrap_or(current.starts_at);
        let ends_at = req.ends_at.unwrap_or(current.ends_at);
        let mut errors = FieldErrors::new();
        check_window(&mut errors, starts_at, ends_at);
        errors.into_result()?;

        if let Some(venue_id) = req.venue_id {
            self.ensure_venue(ctx, venue_id).await?;
        }

        let sql = format!(
            r#"
            UPDATE events
            SET name = COALESCE($3, name),
                description = COALESCE($4, description),
                venue_id = COALESCE($5, venue_id),
                starts_at = $6,
                ends_at = $7,
                updated_at = now()
            WHERE tenant_id = $1 AND id = $2 AND deleted_at IS NULL
            RETURNING {}
            "#,
            EVENT_COLUMNS
        );
        sqlx::query_as::<_, Event>(&sql)
            .bind(ctx.tenant_id())
            .bind(id)
            .bind(req.name.as_deref().map(str::trim))
            .bind(req.description.as_deref())
            .bind(req.venue_id)
            .bind(starts_at)
            .bind(ends_at)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ServiceError::not_found("Event"))
    }

    pub async fn change_status(&self, ctx: &AccessContext, id: Uuid, next: EventStatus) -> Result<Event, ServiceError> {
        ctx.require("events.update")?;
        let current = self.find(ctx.tenant_id(), id).await?;

        if !current.status.can_transition_to(next) {
            return Err(ServiceError::Unprocessable(format!(
                "Cannot change event status from {} to {}",
                current.status, next
            )));
        }

        // Guarded on the old status so concurrent transitions cannot both win
        let sql = format!(
            r#"
            UPDATE events
            SET status = $4, updated_at = now()
            WHERE tenant_id = $1 AND id = $2 AND status = $3 AND deleted_at IS NULL
            RETURNING {}
            "#,
            EVENT_COLUMNS
        );
        let event = sqlx::query_as::<_, Event>(&sql)
            .bind(ctx.tenant_id())
            .bind(id)
            .bind(current.status.as_str())
            .bind(next.as_str())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ServiceError::Conflict("Event status changed concurrently".to_string()))?;

        tracing::info!(tenant = %ctx.tenant.slug, event = %id, from = %current.status, to = %next, "Event status changed");
        Ok(event)
    }

    pub async fn delete(&self, ctx: &AccessContext, id: Uuid) -> Result<(), ServiceError> {
        ctx.require("events.delete")?;
        self.find(ctx.tenant_id(), id).await?;

        sqlx::query("UPDATE events SET deleted_at = now() WHERE tenant_id = $1 AND id = $2")
            .bind(ctx.tenant_id())
            .bind(id)
            .execute(&self.pool)
            .await?;

        tracing::info!(tenant = %ctx.tenant.slug, event = %id, "Event deleted");
        Ok(())
    }

    pub(crate) async fn find(&self, tenant_id: Uuid, id: Uuid) -> Result<Event, ServiceError> {
        let sql = format!(
            "SELECT {} FROM events WHERE tenant_id = $1 AND id = $2 AND deleted_at IS NULL",
            EVENT_COLUMNS
        );
        sqlx::query_as::<_, Event>(&sql)
            .bind(tenant_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ServiceError::not_found("Event"))
    }

    async fn ensure_venue(&self, ctx: &AccessContext, venue_id: Uuid) -> Result<(), ServiceError> {
        match VenueService::new(self.pool.clone()).find(ctx.tenant_id(), venue_id).await {
            Ok(_) => Ok(()),
            Err(ServiceError::NotFound(_)) => {
                let mut errors = FieldErrors::new();
                errors.add("venue_id", "Venue does not exist in this tenant");
                Err(ServiceError::Validation(errors))
            }
            Err(e) => Err(e),
        }
    }
}

fn push_where(qb: &mut QueryBuilder<'_, Postgres>, tenant_id: Uuid, query: &EventQuery) {
    qb.push(" WHERE deleted_at IS NULL AND tenant_id = ").push_bind(tenant_id);
    if let Some(status) = query.status {
        qb.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(venue_id) = query.venue_id {
        qb.push(" AND venue_id = ").push_bind(venue_id);
    }
    if let Some(from) = query.from {
        qb.push(" AND ends_at >= ").push_bind(from);
    }
    if let Some(to) = query.to {
        qb.push(" AND starts_at <= ").push_bind(to);
    }
    if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        qb.push(" AND name ILIKE ").push_bind(contains_pattern(search));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn end_must_not_precede_start() {
        let now = Utc::now();
        let req = CreateEventRequest {
            name: "Launch".into(),
            description: None,
            venue_id: None,
            starts_at: now,
            ends_at: now - Duration::hours(1),
        };
        assert!(matches!(req.validate(), Err(ServiceError::Validation(e)) if e.get("ends_at").is_some()));

        let same_instant = CreateEventRequest {
            ends_at: now,
            ..req
        };
        assert!(same_instant.validate().is_ok());
    }

    #[test]
    fn partial_update_checks_window_only_when_both_given() {
        let now = Utc::now();
        let only_end = UpdateEventRequest {
            name: None,
            description: None,
            venue_id: None,
            starts_at: None,
            ends_at: Some(now - Duration::days(30)),
        };
        assert!(only_end.validate().is_ok());
    }

    #[test]
    fn status_request_parses_snake_case() {
        let req: ChangeStatusRequest = serde_json::from_str(r#"{"status":"published"}"#).unwrap();
        assert_eq!(req.status, EventStatus::Published);
        assert!(serde_json::from_str::<ChangeStatusRequest>(r#"{"status":"archived"}"#).is_err());
    }

    #[test]
    fn where_clause_includes_every_filter() {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM events");
        push_where(
            &mut qb,
            Uuid::new_v4(),
            &EventQuery {
                status: Some(EventStatus::Published),
                venue_id: Some(Uuid::new_v4()),
                from: Some(Utc::now()),
                to: Some(Utc::now()),
                search: Some("gala".into()),
            },
        );
        assert_eq!(
            qb.sql(),
            "SELECT COUNT(*) FROM events WHERE deleted_at IS NULL AND tenant_id = $1 AND status = $2 \
             AND venue_id = $3 AND ends_at >= $4 AND starts_at <= $5 AND name ILIKE $6"
        );
    }
}
