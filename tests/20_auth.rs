mod common;

use anyhow::Result;
use reqwest::StatusCode;
use serde_json::{json, Value};

#[tokio::test]
async fn protected_routes_reject_missing_token() -> Result<()> {
    let server = common::ensure_server().await?;
    let client = reqwest::Client::new();

    for path in ["/api/events", "/api/tenants", "/api/auth/whoami", "/api/roles"] {
        let resp = client.get(server.url(path)).send().await?;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "{}", path);
        let body: Value = resp.json().await?;
        assert_eq!(body["code"], "UNAUTHORIZED");
    }
    Ok(())
}

#[tokio::test]
async fn protected_routes_reject_malformed_token() -> Result<()> {
    let server = common::ensure_server().await?;

    let resp = reqwest::Client::new()
        .get(server.url("/api/venues"))
        .bearer_auth("definitely-not-a-jwt")
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn register_rejects_invalid_body() -> Result<()> {
    let server = common::ensure_server().await?;

    let resp = reqwest::Client::new()
        .post(server.url("/auth/register"))
        .json(&json!({ "email": "not-an-email", "name": "", "password": "x" }))
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let body: Value = resp.json().await?;
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert!(body["field_errors"]["email"].is_string());
    assert!(body["field_errors"]["password"].is_string());
    Ok(())
}

#[tokio::test]
async fn login_rejects_malformed_json() -> Result<()> {
    let server = common::ensure_server().await?;

    let resp = reqwest::Client::new()
        .post(server.url("/auth/login"))
        .header("content-type", "application/json")
        .body("{\"email\":")
        .send()
        .await?;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let body: Value = resp.json().await?;
    assert_eq!(body["success"], false);
    Ok(())
}
