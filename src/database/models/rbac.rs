use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Feature module with its enablement for the current tenant
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TenantModule {
    pub id: Uuid,
    pub key: String,
    pub name: String,
    pub description: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Permission {
    pub id: Uuid,
    pub key: String,
    pub action: String,
    pub module_key: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Role {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoleWithPermissions {
    #[serde(flatten)]
    pub role: Role,
    pub permissions: Vec<String>,
    pub member_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Membership {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub user_id: Uuid,
    pub role_id: Option<Uuid>,
    pub is_owner: bool,
    pub is_active: bool,
    pub joined_at: DateTime<Utc>,
}

/// Membership joined with the user's profile and role name, for member listings
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct MemberDetail {
    pub user_id: Uuid,
    pub email: String,
    pub name: String,
    pub role_id: Option<Uuid>,
    pub role_name: Option<String>,
    pub is_owner: bool,
    pub is_active: bool,
    pub joined_at: DateTime<Utc>,
}
