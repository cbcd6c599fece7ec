use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use crate::app::AppState;
use crate::errors::{AppError, AppResult};
use crate::events;
use crate::jwt::CurrentPrincipal;
use crate::models::rule::{PermissionCheckRequest, PermissionCheckResponse, RuleRegisterRequest};
use crate::rules::{permissions, Entity, Principal, Rule, RulesError};

#[utoipa::path(
    get,
    path = "/rules",
    tag = "Rules",
    responses((status = 200, description = "Registered rules ordered by entity type and codename", body = [Rule]))
)]
pub async fn list_rules(State(state): State<AppState>) -> Json<Vec<Rule>> {
    let rules = state.engine.registry().rules().iter().map(|rule| rule.as_ref().clone()).collect();
    Json(rules)
}

#[utoipa::path(
    get,
    path = "/rules/{entity_type}/{codename}",
    tag = "Rules",
    params(
        ("entity_type" = String, Path, description = "Entity type name"),
        ("codename" = String, Path, description = "Permission codename")
    ),
    responses(
        (status = 200, description = "Rule", body = Rule),
        (status = 404, description = "No such rule")
    )
)]
pub async fn get_rule(
    State(state): State<AppState>,
    Path((entity_type, codename)): Path<(String, String)>,
) -> AppResult<Json<Rule>> {
    let rule = state
        .engine
        .registry()
        .lookup(&entity_type, &codename)
        .ok_or_else(|| AppError::not_found(format!("rule {}.{} not found", entity_type, codename)))?;
    Ok(Json(rule.as_ref().clone()))
}

#[utoipa::path(
    post,
    path = "/rules",
    tag = "Rules",
    request_body = RuleRegisterRequest,
    security(("bearerAuth" = [])),
    responses(
        (status = 201, description = "Rule registered", body = Rule),
        (status = 200, description = "Existing rule overwritten, or already identical", body = Rule),
        (status = 400, description = "Unknown entity type or member, or callable with too many parameters"),
        (status = 401, description = "Anonymous caller"),
        (status = 403, description = "Caller lacks rules.manage"),
        (status = 409, description = "Rule exists and duplicates are rejected")
    )
)]
pub async fn register_rule(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Json(payload): Json<RuleRegisterRequest>,
) -> AppResult<(StatusCode, Json<Rule>)> {
    ensure_can_manage(&state, &principal)?;

    let descriptor = state
        .catalog
        .descriptor(&payload.entity_type)
        .ok_or_else(|| AppError::bad_request(format!("unknown entity type '{}'", payload.entity_type)))?;

    let registration = state
        .engine
        .registry()
        .register(descriptor.as_ref(), payload.to_spec())
        .map_err(registration_error)?;

    if registration.unchanged {
        return Ok((StatusCode::OK, Json(registration.rule.as_ref().clone())));
    }

    if let Some(store) = &state.store {
        store.save(&registration.rule).await?;
    }

    let (status, action) = if registration.overwrote() {
        (StatusCode::OK, "overwritten")
    } else {
        (StatusCode::CREATED, "registered")
    };
    events::log_activity(&state.event_bus, action, Some(principal.user_id), registration.rule.as_ref());

    Ok((status, Json(registration.rule.as_ref().clone())))
}

#[utoipa::path(
    delete,
    path = "/rules/{entity_type}/{codename}",
    tag = "Rules",
    params(
        ("entity_type" = String, Path, description = "Entity type name"),
        ("codename" = String, Path, description = "Permission codename")
    ),
    security(("bearerAuth" = [])),
    responses(
        (status = 204, description = "Rule removed"),
        (status = 401, description = "Anonymous caller"),
        (status = 403, description = "Caller lacks rules.manage"),
        (status = 404, description = "No such rule")
    )
)]
pub async fn delete_rule(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Path((entity_type, codename)): Path<(String, String)>,
) -> AppResult<StatusCode> {
    ensure_can_manage(&state, &principal)?;

    let removed = state.engine.registry().unregister(&entity_type, &codename);
    let persisted = match &state.store {
        Some(store) => store.delete(&entity_type, &codename).await?,
        None => false,
    };

    match removed {
        Some(rule) => {
            events::log_activity(&state.event_bus, "deleted", Some(principal.user_id), rule.as_ref());
            Ok(StatusCode::NO_CONTENT)
        }
        None if persisted => Ok(StatusCode::NO_CONTENT),
        None => Err(AppError::not_found(format!("rule {}.{} not found", entity_type, codename))),
    }
}

/// Evaluate a permission for the caller against a stored target.
#[utoipa::path(
    post,
    path = "/rules/check",
    tag = "Rules",
    request_body = PermissionCheckRequest,
    responses(
        (status = 200, description = "Decision for the caller (anonymous without a token)", body = PermissionCheckResponse),
        (status = 400, description = "Unknown entity type"),
        (status = 500, description = "Rule misconfiguration")
    )
)]
pub async fn check_permission(
    State(state): State<AppState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    Json(payload): Json<PermissionCheckRequest>,
) -> AppResult<Json<PermissionCheckResponse>> {
    let loader = state
        .catalog
        .loader(&payload.entity_type)
        .ok_or_else(|| AppError::bad_request(format!("unknown entity type '{}'", payload.entity_type)))?;

    let target = loader.load(&state.pool, &payload.pk).await?;
    let allowed = state
        .backends
        .has_perm(&principal, &payload.codename, target.as_deref().map(|t| t as &dyn Entity))?;

    Ok(Json(PermissionCheckResponse { allowed }))
}

fn ensure_can_manage(state: &AppState, principal: &Principal) -> AppResult<()> {
    if principal.is_anonymous() {
        return Err(AppError::unauthorized("authentication required"));
    }
    if !state.backends.has_perm(principal, permissions::RULES_MANAGE, None)? {
        return Err(AppError::forbidden(format!("{} required", permissions::RULES_MANAGE)));
    }
    Ok(())
}

/// Registration failures caused by the request body map to 4xx.
fn registration_error(err: RulesError) -> AppError {
    match err {
        RulesError::DuplicateRule { .. } => AppError::conflict(err.to_string()),
        RulesError::Configuration(_) | RulesError::TooManyParameters { .. } | RulesError::NonexistentFieldName { .. } => {
            AppError::bad_request(err.to_string())
        }
        other => other.into(),
    }
}
