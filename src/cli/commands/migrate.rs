use anyhow::Context;

use crate::cli::{utils::output_success, OutputFormat};
use crate::config;
use crate::database::DatabaseManager;

pub async fn handle(output_format: OutputFormat) -> anyhow::Result<()> {
    let pool = DatabaseManager::connect(&config::config().database)
        .await
        .context("failed to connect to database")?;
    DatabaseManager::migrate(&pool).await.context("failed to apply migrations")?;
    pool.close().await;

    output_success(output_format, "Migrations applied", None)
}
