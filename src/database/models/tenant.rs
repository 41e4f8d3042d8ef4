use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Tenant {
    pub fn is_usable(&self) -> bool {
        self.is_active && self.deleted_at.is_none()
    }
}

/// A tenant as seen by one of its members
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct TenantMembershipSummary {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    pub is_owner: bool,
    pub role_name: Option<String>,
    pub joined_at: DateTime<Utc>,
}
