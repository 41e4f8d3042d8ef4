// handlers/system.rs - GET / and GET /health

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};

use crate::app::AppState;
use crate::database::DatabaseManager;

pub async fn root() -> Json<Value> {
    Json(json!({
        "success": true,
        "data": {
            "name": "EventDesk API",
            "version": env!("CARGO_PKG_VERSION"),
            "description": "Multi-tenant event management: events, departments, tasks, venues, chat and feedback",
            "endpoints": {
                "home": "/ (public)",
                "health": "/health (public)",
                "public_auth": "/auth/register, /auth/login, /auth/refresh (public - token acquisition)",
                "auth": "/api/auth/whoami, /api/auth/profile (protected)",
                "tenants": "/api/tenants (protected)",
                "tenant": "/api/tenant, /api/modules, /api/permissions, /api/roles, /api/members (tenant-scoped)",
                "events": "/api/events[/:id[/status|/feedback]] (tenant-scoped)",
                "venues": "/api/venues[/:id] (tenant-scoped)",
                "departments": "/api/departments[/:id[/members|/messages]] (tenant-scoped)",
                "tasks": "/api/tasks[/:id] (tenant-scoped)",
                "attachments": "/api/attachments[/:id[/content]] (tenant-scoped)"
            }
        }
    }))
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let now = chrono::Utc::now();

    match DatabaseManager::health_check(&state.pool).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "data": {
                    "status": "ok",
                    "timestamp": now,
                    "database": "ok"
                }
            })),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "success": false,
                    "error": "database unavailable",
                    "code": "SERVICE_UNAVAILABLE",
                    "data": {
                        "status": "degraded",
                        "timestamp": now,
                        "database": "unavailable"
                    }
                })),
            )
        }
    }
}
