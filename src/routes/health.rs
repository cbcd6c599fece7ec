use axum::extract::State;
use axum::Json;
use serde::Serialize;
use sqlx::query_scalar;
use utoipa::ToSchema;

use crate::app::AppState;
use crate::rules::RulesStore;

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub db_ok: bool,
    pub db_error: Option<String>,
    /// `memory` or `database`.
    pub rules_store: &'static str,
    /// Rules currently registered.
    pub rules: usize,
}

#[utoipa::path(
    get,
    path = "/api/health",
    tag = "Health",
    responses((status = 200, description = "Database reachability and registry size", body = HealthResponse))
)]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let db_error = query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&state.pool)
        .await
        .err()
        .map(|e| e.to_string());

    Json(HealthResponse {
        status: "ok",
        db_ok: db_error.is_none(),
        db_error,
        rules_store: match state.config.store {
            RulesStore::Memory => "memory",
            RulesStore::Database => "database",
        },
        rules: state.engine.registry().len(),
    })
}
