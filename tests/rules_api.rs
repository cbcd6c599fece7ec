use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use serde_json::{json, Value};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::{tempdir, TempDir};
use tower::util::ServiceExt;
use uuid::Uuid;

use object_rules::events::verify_audit_chain;
use object_rules::jwt::JwtConfig;
use object_rules::rules::{roles, DuplicatePolicy, RulesStore};
use object_rules::{create_app_with, RulesConfig};

async fn setup_pool() -> Result<(TempDir, SqlitePool)> {
    let dir = tempdir()?;
    let opts = SqliteConnectOptions::new()
        .filename(dir.path().join("rules.db"))
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator = sqlx::migrate::Migrator::new(Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")).await?;
    migrator.run(&pool).await?;
    Ok((dir, pool))
}

fn database_config() -> RulesConfig {
    RulesConfig::default().with_store(RulesStore::Database)
}

async fn app_for(pool: &SqlitePool, config: RulesConfig) -> Result<Router> {
    Ok(create_app_with(pool.clone(), JwtConfig::new("test-secret", 24), config).await?)
}

async fn body_json(resp: Response) -> Result<Value> {
    let bytes = body::to_bytes(resp.into_body(), 1_048_576).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

async fn register(app: &Router, email: &str) -> Result<(String, Uuid)> {
    let req = Request::builder()
        .method("POST")
        .uri("/auth/register")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({ "name": email, "email": email, "password": "password123" }).to_string(),
        ))?;
    let resp = app.clone().oneshot(req).await?;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let v = body_json(resp).await?;
    let token = v["token"].as_str().context("token")?.to_string();
    let id = v["user"]["id"].as_str().context("user id")?.parse()?;
    Ok((token, id))
}

async fn make_superuser(pool: &SqlitePool, user_id: Uuid) -> Result<()> {
    sqlx::query("UPDATE users SET is_superuser = 1 WHERE id = ?")
        .bind(user_id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

async fn send_json(app: &Router, method: &str, uri: &str, token: Option<&str>, body: Value) -> Result<Response> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    Ok(app.clone().oneshot(builder.body(Body::from(body.to_string()))?).await?)
}

async fn send(app: &Router, method: &str, uri: &str, token: Option<&str>) -> Result<Response> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {}", token));
    }
    Ok(app.clone().oneshot(builder.body(Body::empty())?).await?)
}

fn can_ship() -> Value {
    json!({
        "entity_type": "parcel",
        "codename": "can_ship",
        "view_param_pk": "parcel_id",
        "description": "Only the supplier may ship a parcel"
    })
}

/// The audit listener runs in the background; wait for it to catch up.
async fn wait_for_audit(pool: &SqlitePool, expected: i64) -> Result<i64> {
    let mut count = 0;
    for _ in 0..50 {
        count = sqlx::query_scalar("SELECT COUNT(*) FROM rule_audit").fetch_one(pool).await?;
        if count >= expected {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    Ok(count)
}

#[tokio::test]
async fn registering_rules_requires_rules_manage() -> Result<()> {
    let (_dir, pool) = setup_pool().await?;
    let app = app_for(&pool, database_config()).await?;

    let resp = send_json(&app, "POST", "/rules", None, can_ship()).await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let (plain, _) = register(&app, "plain@example.com").await?;
    let resp = send_json(&app, "POST", "/rules", Some(&plain), can_ship()).await?;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let (rules_admin, rules_admin_id) = register(&app, "rules@example.com").await?;
    sqlx::query("INSERT INTO user_roles (user_id, role) VALUES (?, ?)")
        .bind(rules_admin_id.to_string())
        .bind(roles::RULES_ADMIN)
        .execute(&pool)
        .await?;
    let resp = send_json(&app, "POST", "/rules", Some(&rules_admin), can_ship()).await?;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let v = body_json(resp).await?;
    assert_eq!(v["codename"], "can_ship");
    assert_eq!(v["entity_type"], "parcel");
    assert_eq!(v["field_name"], "can_ship", "field_name defaults to the codename");
    assert_eq!(v["view_param_pk"], "parcel_id");

    Ok(())
}

#[tokio::test]
async fn invalid_registrations_are_rejected() -> Result<()> {
    let (_dir, pool) = setup_pool().await?;
    let app = app_for(&pool, database_config()).await?;
    let (admin, admin_id) = register(&app, "admin@example.com").await?;
    make_superuser(&pool, admin_id).await?;

    let unknown_entity = json!({ "entity_type": "crate", "codename": "can_ship" });
    let resp = send_json(&app, "POST", "/rules", Some(&admin), unknown_entity).await?;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let stale_field = json!({ "entity_type": "parcel", "codename": "can_fly" });
    let resp = send_json(&app, "POST", "/rules", Some(&admin), stale_field).await?;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let v = body_json(resp).await?;
    assert!(v["message"].as_str().unwrap_or_default().contains("can_fly"), "got {}", v);

    let blank = json!({ "entity_type": "parcel", "codename": "  " });
    let resp = send_json(&app, "POST", "/rules", Some(&admin), blank).await?;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = send(&app, "GET", "/rules", None).await?;
    assert_eq!(body_json(resp).await?, json!([]), "failed registrations leave no rule behind");

    Ok(())
}

#[tokio::test]
async fn duplicates_overwrite_or_conflict_by_policy() -> Result<()> {
    let (_dir, pool) = setup_pool().await?;
    let app = app_for(&pool, database_config()).await?;
    let (admin, admin_id) = register(&app, "admin@example.com").await?;
    make_superuser(&pool, admin_id).await?;

    assert_eq!(send_json(&app, "POST", "/rules", Some(&admin), can_ship()).await?.status(), StatusCode::CREATED);

    let mut replacement = can_ship();
    replacement["description"] = json!("Replaced");
    let resp = send_json(&app, "POST", "/rules", Some(&admin), replacement.clone()).await?;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await?["description"], "Replaced");

    let mut strict = database_config();
    strict.duplicates = DuplicatePolicy::Reject;
    let strict_app = app_for(&pool, strict).await?;

    // same definition as the persisted row
    let resp = send_json(&strict_app, "POST", "/rules", Some(&admin), replacement).await?;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await?["description"], "Replaced");

    let resp = send_json(&strict_app, "POST", "/rules", Some(&admin), can_ship()).await?;
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(resp).await?["error"], "conflict");

    Ok(())
}

#[tokio::test]
async fn persisted_rules_survive_a_restart() -> Result<()> {
    let (_dir, pool) = setup_pool().await?;
    let app = app_for(&pool, database_config()).await?;
    let (admin, admin_id) = register(&app, "admin@example.com").await?;
    make_superuser(&pool, admin_id).await?;

    assert_eq!(send_json(&app, "POST", "/rules", Some(&admin), can_ship()).await?.status(), StatusCode::CREATED);

    let restarted = app_for(&pool, database_config()).await?;
    let resp = send(&restarted, "GET", "/rules/parcel/can_ship", None).await?;
    assert_eq!(resp.status(), StatusCode::OK);
    let v = body_json(resp).await?;
    assert_eq!(v["view_param_pk"], "parcel_id");
    assert_eq!(v["description"], "Only the supplier may ship a parcel");

    let memory_only = app_for(&pool, RulesConfig::default()).await?;
    let resp = send(&memory_only, "GET", "/rules/parcel/can_ship", None).await?;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND, "memory store ignores persisted rules");

    Ok(())
}

#[tokio::test]
async fn check_endpoint_evaluates_for_the_caller() -> Result<()> {
    let (_dir, pool) = setup_pool().await?;
    let app = app_for(&pool, database_config()).await?;
    let (admin, admin_id) = register(&app, "admin@example.com").await?;
    make_superuser(&pool, admin_id).await?;
    let (supplier, _) = register(&app, "supplier@example.com").await?;
    let (other, _) = register(&app, "other@example.com").await?;

    assert_eq!(send_json(&app, "POST", "/rules", Some(&admin), can_ship()).await?.status(), StatusCode::CREATED);

    let resp = send_json(&app, "POST", "/parcels", Some(&supplier), json!({ "name": "Spare parts" })).await?;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let parcel_id = body_json(resp).await?["id"].as_str().context("parcel id")?.to_string();

    let check = json!({ "entity_type": "parcel", "codename": "can_ship", "pk": parcel_id });
    let resp = send_json(&app, "POST", "/rules/check", Some(&supplier), check.clone()).await?;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await?["allowed"], true);

    let resp = send_json(&app, "POST", "/rules/check", Some(&other), check.clone()).await?;
    assert_eq!(body_json(resp).await?["allowed"], false);

    let resp = send_json(&app, "POST", "/rules/check", None, check.clone()).await?;
    assert_eq!(body_json(resp).await?["allowed"], false);

    let missing_target = json!({ "entity_type": "parcel", "codename": "can_ship", "pk": Uuid::new_v4() });
    let resp = send_json(&app, "POST", "/rules/check", Some(&supplier), missing_target).await?;
    assert_eq!(body_json(resp).await?["allowed"], false, "absent target is a denial");

    let unknown_entity = json!({ "entity_type": "crate", "codename": "can_ship", "pk": parcel_id });
    let resp = send_json(&app, "POST", "/rules/check", Some(&supplier), unknown_entity).await?;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    // the database store raises on rules nobody registered
    let unregistered = json!({ "entity_type": "parcel", "codename": "can_trash", "pk": parcel_id });
    let resp = send_json(&app, "POST", "/rules/check", Some(&supplier), unregistered).await?;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_json(resp).await?["error"], "nonexistent_permission");

    Ok(())
}

#[tokio::test]
async fn deleting_rules_is_audited() -> Result<()> {
    let (_dir, pool) = setup_pool().await?;
    let app = app_for(&pool, database_config()).await?;
    let (admin, admin_id) = register(&app, "admin@example.com").await?;
    make_superuser(&pool, admin_id).await?;

    assert_eq!(send_json(&app, "POST", "/rules", Some(&admin), can_ship()).await?.status(), StatusCode::CREATED);

    let resp = send(&app, "DELETE", "/rules/parcel/can_ship", Some(&admin)).await?;
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let resp = send(&app, "DELETE", "/rules/parcel/can_ship", Some(&admin)).await?;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let persisted: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rule_permissions").fetch_one(&pool).await?;
    assert_eq!(persisted, 0);

    assert_eq!(wait_for_audit(&pool, 2).await?, 2);
    let names: Vec<String> = sqlx::query_scalar("SELECT event_name FROM rule_audit ORDER BY rowid")
        .fetch_all(&pool)
        .await?;
    assert_eq!(names, vec!["rule.registered", "rule.deleted"]);

    let actor: Option<String> = sqlx::query_scalar("SELECT actor_id FROM rule_audit WHERE event_name = 'rule.deleted'")
        .fetch_one(&pool)
        .await?;
    assert_eq!(actor, Some(admin_id.to_string()));

    let severities: Vec<String> = sqlx::query_scalar("SELECT severity FROM rule_audit ORDER BY rowid")
        .fetch_all(&pool)
        .await?;
    assert_eq!(severities, vec!["important", "critical"]);

    assert!(verify_audit_chain(&pool).await?);

    Ok(())
}
