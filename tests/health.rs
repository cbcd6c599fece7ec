use anyhow::Result;
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use serde_json::Value;
use sqlx::SqlitePool;
use tempfile::tempdir;
use tower::util::ServiceExt; // for `oneshot`

use object_rules::jwt::JwtConfig;
use object_rules::{create_app, create_app_with, RulesConfig};

async fn setup_pool(dir: &std::path::Path) -> Result<SqlitePool> {
    use sqlx::sqlite::SqliteConnectOptions;
    let opts = SqliteConnectOptions::new()
        .filename(dir.join("test.db"))
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator = sqlx::migrate::Migrator::new(std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")).await?;
    migrator.run(&pool).await?;
    Ok(pool)
}

#[tokio::test]
async fn health_endpoint_reports_db_ok() -> Result<()> {
    let dir = tempdir()?;
    let pool = setup_pool(dir.path()).await?;

    std::env::set_var("JWT_SECRET", "test-secret");
    let app = create_app(pool.clone()).await?;

    let req = Request::builder()
        .method("GET")
        .uri("/api/health")
        .body(Body::empty())?;

    let resp: Response = app.oneshot(req).await?;
    assert_eq!(resp.status(), StatusCode::OK, "health endpoint did not return 200");

    let body_bytes = body::to_bytes(resp.into_body(), 10_485_760).await?;
    let v: Value = serde_json::from_slice(&body_bytes)?;
    let db_ok = v.get("db_ok").and_then(|b| b.as_bool()).unwrap_or(false);
    assert!(db_ok, "expected db_ok: true, got: {}", v);

    Ok(())
}

#[tokio::test]
async fn health_counts_synced_rules() -> Result<()> {
    let dir = tempdir()?;
    let pool = setup_pool(dir.path()).await?;

    let config = RulesConfig::default().with_rules_root(std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("rulesets"));
    let app = create_app_with(pool, JwtConfig::new("test-secret", 24), config).await?;

    let req = Request::builder().uri("/api/health").body(Body::empty())?;
    let resp = app.oneshot(req).await?;
    assert_eq!(resp.status(), StatusCode::OK);

    let v: Value = serde_json::from_slice(&body::to_bytes(resp.into_body(), 1_048_576).await?)?;
    assert_eq!(v["rules"], 2, "shipping ships can_ship and can_trash: {}", v);
    assert_eq!(v["rules_store"], "memory");

    Ok(())
}
