//! Route guard enforcing a per-object rule before the handler runs.
//!
//! ```ignore
//! let guard = GuardState::new(state.clone(), PermissionGuard::new("parcel", "can_ship")?);
//! Router::new()
//!     .route("/:parcel_id/ship", post(ship_parcel))
//!     .route_layer(from_fn_with_state(guard, require_object_permission));
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{FromRef, OriginalUri, Path, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};

use crate::app::AppState;
use crate::errors::{AppError, AppResult};
use crate::jwt::CurrentPrincipal;
use crate::rules::{RulesError, RulesResult};

pub const REDIRECT_FIELD_NAME: &str = "next";

#[derive(Debug, Clone)]
pub struct PermissionGuard {
    entity_type: String,
    codename: String,
    return_403: bool,
    login_url: Option<String>,
    redirect_url: Option<String>,
    redirect_field_name: String,
}

impl PermissionGuard {
    /// Denied callers are redirected to the login url unless
    /// [`return_403`](Self::return_403) is set.
    pub fn new(entity_type: impl Into<String>, codename: impl Into<String>) -> RulesResult<Self> {
        let codename = codename.into();
        if codename.trim().is_empty() {
            return Err(RulesError::configuration("permission guard requires a codename"));
        }

        Ok(Self {
            entity_type: entity_type.into(),
            codename,
            return_403: false,
            login_url: None,
            redirect_url: None,
            redirect_field_name: REDIRECT_FIELD_NAME.to_string(),
        })
    }

    pub fn return_403(mut self, return_403: bool) -> Self {
        self.return_403 = return_403;
        self
    }

    pub fn login_url(mut self, url: impl Into<String>) -> Self {
        self.login_url = Some(url.into());
        self
    }

    pub fn redirect_url(mut self, url: impl Into<String>) -> Self {
        self.redirect_url = Some(url.into());
        self
    }

    pub fn redirect_field_name(mut self, name: impl Into<String>) -> Self {
        self.redirect_field_name = name.into();
        self
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn codename(&self) -> &str {
        &self.codename
    }

    fn denied(&self, default_login_url: &str, uri: &OriginalUri) -> Response {
        if self.return_403 {
            return AppError::forbidden(format!("permission '{}' denied", self.codename)).into_response();
        }

        let base = self
            .redirect_url
            .as_deref()
            .or(self.login_url.as_deref())
            .unwrap_or(default_login_url);
        let path = uri.0.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        // `/` is left unescaped in the return path
        let next = urlencoding::encode(path).replace("%2F", "/");
        let location = format!("{}?{}={}", base, self.redirect_field_name, next);

        Redirect::to(&location).into_response()
    }
}

#[derive(Clone)]
pub struct GuardState {
    pub app: AppState,
    pub guard: Arc<PermissionGuard>,
}

impl GuardState {
    pub fn new(app: AppState, guard: PermissionGuard) -> Self {
        Self {
            app,
            guard: Arc::new(guard),
        }
    }
}

impl FromRef<GuardState> for AppState {
    fn from_ref(input: &GuardState) -> Self {
        input.app.clone()
    }
}

pub async fn require_object_permission(
    State(state): State<GuardState>,
    CurrentPrincipal(principal): CurrentPrincipal,
    params: Option<Path<HashMap<String, String>>>,
    uri: OriginalUri,
    request: Request,
    next: Next,
) -> AppResult<Response> {
    let guard = &state.guard;
    let app = &state.app;

    let rule = app
        .engine
        .registry()
        .lookup_or_register_lazy(&guard.entity_type, &guard.codename)?
        .ok_or_else(|| RulesError::nonexistent_permission(&guard.codename, &guard.entity_type))?;

    let params = params.map(|Path(p)| p).unwrap_or_default();
    let pk = params.get(rule.view_param_pk()).ok_or_else(|| {
        RulesError::configuration(format!(
            "route guarded by '{}' has no path parameter '{}'",
            rule.codename(),
            rule.view_param_pk()
        ))
    })?;

    let loader = app.catalog.loader(&guard.entity_type).ok_or_else(|| {
        RulesError::configuration(format!("entity type '{}' has no loader", guard.entity_type))
    })?;
    let target = loader
        .load(&app.pool, pk)
        .await?
        .ok_or_else(|| AppError::not_found(format!("{} not found", guard.entity_type)))?;

    let allowed = app.backends.has_perm(&principal, rule.codename(), Some(target.as_ref()))?;

    if !allowed {
        tracing::info!(
            user_id = %principal.user_id,
            entity_type = %guard.entity_type,
            permission = %guard.codename,
            "guarded route denied"
        );
        return Ok(guard.denied(&app.config.login_url, &uri));
    }

    Ok(next.run(request).await)
}
