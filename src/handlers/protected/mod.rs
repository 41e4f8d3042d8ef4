// handlers/protected/mod.rs - JWT-protected handlers
//
// `auth` and `tenants` accept any valid token. Everything else is
// tenant-scoped and receives the caller's AccessContext from
// validate_tenant_middleware.

pub mod attachments;
pub mod auth;
pub mod chat;
pub mod departments;
pub mod events;
pub mod feedback;
pub mod members;
pub mod rbac;
pub mod tasks;
pub mod tenants;
pub mod venues;
