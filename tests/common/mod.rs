#![allow(dead_code)]

use std::process::{Child, Command, Stdio};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use reqwest::StatusCode;

static SERVER: OnceLock<TestServer> = OnceLock::new();

pub const JWT_SECRET: &str = "integration-test-secret";

pub struct TestServer {
    pub port: u16,
    pub base_url: String,
    _storage: tempfile::TempDir,
    child: Child,
}

impl TestServer {
    fn spawn() -> Result<Self> {
        // Pick an unused port for isolation
        let port = portpicker::pick_unused_port().context("failed to pick free port")?;
        let base_url = format!("http://127.0.0.1:{}", port);
        let storage = tempfile::tempdir().context("failed to create storage dir")?;

        // The database may be absent; the server still starts and reports
        // degraded health. Migrations are left to the migrate command.
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_eventdesk"));
        cmd.arg("serve")
            .env("APP_ENV", "development")
            .env("SERVER_HOST", "127.0.0.1")
            .env("SERVER_PORT", port.to_string())
            .env("JWT_SECRET", JWT_SECRET)
            .env("DATABASE_RUN_MIGRATIONS", "false")
            .env("DATABASE_CONNECTION_TIMEOUT", "2")
            .env("STORAGE_ROOT", storage.path())
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit());

        let child = cmd.spawn().context("failed to spawn server binary")?;

        Ok(Self {
            port,
            base_url,
            _storage: storage,
            child,
        })
    }

    async fn wait_ready(&self, timeout: Duration) -> Result<()> {
        let client = reqwest::Client::new();
        let deadline = Instant::now() + timeout;
        loop {
            if Instant::now() > deadline {
                break;
            }
            let url = format!("{}/", self.base_url);
            if let Ok(resp) = client.get(&url).send().await {
                if resp.status() == StatusCode::OK {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(150)).await;
        }
        anyhow::bail!("server did not become ready on {} within {:?}", self.base_url, timeout)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

pub async fn ensure_server() -> Result<&'static TestServer> {
    let server = SERVER.get_or_init(|| TestServer::spawn().expect("failed to spawn server binary"));
    server.wait_ready(Duration::from_secs(15)).await?;
    Ok(server)
}

/// Pool against `DATABASE_URL` with migrations applied, or `None` when the
/// variable is unset so database tests can skip.
pub async fn test_pool(max_connections: u32) -> Result<Option<sqlx::PgPool>> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        eprintln!("DATABASE_URL not set; skipping database test");
        return Ok(None);
    };

    let pool = eventdesk::database::DatabaseManager::connect(&eventdesk::config::DatabaseConfig {
        url,
        max_connections,
        connection_timeout: 5,
        run_migrations: true,
    })
    .await?;
    eventdesk::database::DatabaseManager::migrate(&pool).await?;
    Ok(Some(pool))
}

/// Short random suffix for emails and slugs so tests never collide.
pub fn unique(prefix: &str) -> String {
    format!("{}-{}", prefix, &uuid::Uuid::new_v4().simple().to_string()[..12])
}
