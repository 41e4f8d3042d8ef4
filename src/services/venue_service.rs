use serde::Deserialize;
use sqlx::{PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::config::ApiConfig;
use crate::database::models::Venue;
use crate::filter::{contains_pattern, escape_like, ListFilter, ListParams, Page};
use crate::services::{AccessContext, ServiceError};
use crate::validation::{FieldErrors, Validate};

pub const VENUE_ORDER_COLUMNS: &[&str] = &["name", "city", "capacity", "created_at"];

const VENUE_COLUMNS: &str = "id, tenant_id, name, address, city, capacity, notes, created_at, updated_at";

#[derive(Debug, Deserialize)]
pub struct CreateVenueRequest {
    pub name: String,
    pub address: Option<String>,
    pub city: Option<String>,
    pub capacity: Option<i32>,
    pub notes: Option<String>,
}

impl Validate for CreateVenueRequest {
    fn validate(&self) -> Result<(), ServiceError> {
        let mut errors = FieldErrors::new();
        errors.required_text("name", &self.name, 200);
        errors.optional_text("address", self.address.as_deref(), 500);
        errors.optional_text("city", self.city.as_deref(), 200);
        check_capacity(&mut errors, self.capacity);
        errors.into_result()
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateVenueRequest {
    pub name: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub capacity: Option<i32>,
    pub notes: Option<String>,
}

impl Validate for UpdateVenueRequest {
    fn validate(&self) -> Result<(), ServiceError> {
        let mut errors = FieldErrors::new();
        errors.optional_text("name", self.name.as_deref(), 200);
        errors.optional_text("address", self.address.as_deref(), 500);
        errors.optional_text("city", self.city.as_deref(), 200);
        check_capacity(&mut errors, self.capacity);
        errors.into_result()
    }
}

fn check_capacity(errors: &mut FieldErrors, capacity: Option<i32>) {
    errors.check(
        capacity.map_or(true, |c| c > 0),
        "capacity",
        "Capacity must be greater than zero",
    );
}

#[derive(Debug, Default, Deserialize)]
pub struct VenueQuery {
    pub search: Option<String>,
    pub city: Option<String>,
}

pub struct VenueService {
    pool: PgPool,
}

impl VenueService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn list(
        &self,
        ctx: &AccessContext,
        api: &ApiConfig,
        params: &ListParams,
        query: &VenueQuery,
    ) -> Result<Page<Venue>, ServiceError> {
        ctx.require("venues.read")?;
        let filter = ListFilter::from_params(params, api, VENUE_ORDER_COLUMNS, "name")?;

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM venues");
        push_where(&mut count, ctx.tenant_id(), query);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        let mut select = QueryBuilder::<Postgres>::new(format!("SELECT {} FROM venues", VENUE_COLUMNS));
        push_where(&mut select, ctx.tenant_id(), query);
        filter.push_tail(&mut select);
        let items = select.build_query_as::<Venue>().fetch_all(&self.pool).await?;

        Ok(filter.page(items, total))
    }

    pub async fn get(&self, ctx: &AccessContext, id: Uuid) -> Result<Venue, ServiceError> {
        ctx.require("venues.read")?;
        self.find(ctx.tenant_id(), id).await
    }

    pub async fn create(&self, ctx: &AccessContext, req: &CreateVenueRequest) -> Result<Venue, ServiceError> {
        ctx.require("venues.create")?;

        let sql = format!(
            r#"
            INSERT INTO venues (id, tenant_id, name, address, city, capacity, notes)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            VENUE_COLUMNS
        );
        let venue = sqlx::query_as::<_, Venue>(&sql)
            .bind(Uuid::new_v4())
            .bind(ctx.tenant_id())
            .bind(req.name.trim())
            .bind(req.address.as_deref())
            .bind(req.city.as_deref())
            .bind(req.capacity)
            .bind(req.notes.as_deref())
            .fetch_one(&self.pool)
            .await?;

        tracing::info!(tenant = %ctx.tenant.slug, venue = %venue.id, "Venue created");
        Ok(venue)
    }

    pub async fn update(&self, ctx: &AccessContext, id: Uuid, req: &UpdateVenueRequest) -> Result<Venue, ServiceError> {
        ctx.require("venues.update")?;

        let sql = format!(
            r#"
            UPDATE venues
            SET name = COALESCE($3, name),
                address = COALESCE($4, address),
                city = COALESCE($5, city),
                capacity = COALESCE($6, capacity),
                notes = COALESCE($7, notes),
                updated_at = now()
            WHERE tenant_id = $1 AND id = $2 AND deleted_at IS NULL
            RETURNING {}
            "#,
            VENUE_COLUMNS
        );
        sqlx::query_as::<_, Venue>(&sql)
            .bind(ctx.tenant_id())
            .bind(id)
            .bind(req.name.as_deref().map(str::trim))
            .bind(req.address.as_deref())
            .bind(req.city.as_deref())
            .bind(req.capacity)
            .bind(req.notes.as_deref())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ServiceError::not_found("Venue"))
    }

    /// Soft delete. Refused while a live event still takes place at the venue.
    pub async fn delete(&self, ctx: &AccessContext, id: Uuid) -> Result<(), ServiceError> {
        ctx.require("venues.delete")?;
        self.find(ctx.tenant_id(), id).await?;

        let in_use: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM events WHERE tenant_id = $1 AND venue_id = $2 AND deleted_at IS NULL",
        )
        .bind(ctx.tenant_id())
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        if in_use > 0 {
            return Err(ServiceError::Conflict(format!(
                "Venue is used by {} event(s)",
                in_use
            )));
        }

        sqlx::query("UPDATE venues SET deleted_at = now() WHERE tenant_id = $1 AND id = $2")
            .bind(ctx.tenant_id())
            .bind(id)
            .execute(&self.pool)
            .await?;

        tracing::info!(tenant = %ctx.tenant.slug, venue = %id, "Venue deleted");
        Ok(())
    }

    pub(crate) async fn find(&self, tenant_id: Uuid, id: Uuid) -> Result<Venue, ServiceError> {
        let sql = format!(
            "SELECT {} FROM venues WHERE tenant_id = $1 AND id = $2 AND deleted_at IS NULL",
            VENUE_COLUMNS
        );
        sqlx::query_as::<_, Venue>(&sql)
            .bind(tenant_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| ServiceError::not_found("Venue"))
    }
}

fn push_where(qb: &mut QueryBuilder<'_, Postgres>, tenant_id: Uuid, query: &VenueQuery) {
    qb.push(" WHERE deleted_at IS NULL AND tenant_id = ").push_bind(tenant_id);
    if let Some(search) = query.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        qb.push(" AND name ILIKE ").push_bind(contains_pattern(search));
    }
    if let Some(city) = query.city.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        qb.push(" AND city ILIKE ").push_bind(escape_like(city));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_must_be_positive() {
        let req = CreateVenueRequest {
            name: "Main Hall".into(),
            address: None,
            city: Some("Lisbon".into()),
            capacity: Some(0),
            notes: None,
        };
        assert!(matches!(req.validate(), Err(ServiceError::Validation(e)) if e.get("capacity").is_some()));

        let update = UpdateVenueRequest {
            name: None,
            address: None,
            city: None,
            capacity: Some(250),
            notes: None,
        };
        assert!(update.validate().is_ok());
    }

    #[test]
    fn where_clause_binds_optional_filters() {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM venues");
        push_where(
            &mut qb,
            Uuid::new_v4(),
            &VenueQuery {
                search: Some("hall".into()),
                city: Some(" ".into()),
            },
        );
        assert_eq!(
            qb.sql(),
            "SELECT COUNT(*) FROM venues WHERE deleted_at IS NULL AND tenant_id = $1 AND name ILIKE $2"
        );
    }
}
