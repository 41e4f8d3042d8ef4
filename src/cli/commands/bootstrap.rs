use anyhow::Context;
use serde_json::json;

use crate::auth::{self, Claims};
use crate::cli::{utils::output_success, OutputFormat};
use crate::config;
use crate::database::DatabaseManager;
use crate::services::tenant_service::CreateTenantRequest;
use crate::services::user_service::RegisterRequest;
use crate::services::{TenantService, UserService};
use crate::validation::Validate;

pub struct BootstrapArgs {
    pub email: String,
    pub name: String,
    pub password: String,
    pub tenant: String,
    pub slug: Option<String>,
}

/// Create (or reuse) an owner account, create a tenant owned by it and print
/// a tenant-scoped token. Rerunning with the same credentials and a new
/// tenant name adds another tenant to the same account.
pub async fn handle(args: BootstrapArgs, output_format: OutputFormat) -> anyhow::Result<()> {
    let register = RegisterRequest {
        email: args.email,
        name: args.name,
        password: args.password,
    };
    register.validate()?;
    let tenant_req = CreateTenantRequest {
        name: args.tenant,
        slug: args.slug,
    };
    tenant_req.validate()?;

    let pool = DatabaseManager::connect(&config::config().database)
        .await
        .context("failed to connect to database")?;
    DatabaseManager::migrate(&pool).await.context("failed to apply migrations")?;

    let users = UserService::new(pool.clone());
    let user = match users.find_by_email(&register.email).await? {
        Some(existing) => {
            if !auth::verify_password(&register.password, &existing.password_hash)? {
                anyhow::bail!("{} already exists with a different password", existing.email);
            }
            existing
        }
        None => users.create_user(&register).await?,
    };

    let tenant = TenantService::new(pool.clone()).create(user.id, &tenant_req).await?;
    let token = auth::generate_jwt(&Claims::new(user.id, user.email.clone(), Some(tenant.id)))?;
    pool.close().await;

    tracing::info!(user = %user.id, tenant = %tenant.id, "Bootstrap complete");
    output_success(
        output_format,
        &format!("Tenant '{}' created for {}", tenant.slug, user.email),
        Some(json!({
            "user_id": user.id,
            "tenant_id": tenant.id,
            "tenant": tenant.slug,
            "token": token,
        })),
    )
}
