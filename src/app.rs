use std::sync::Arc;

use axum::http::Method;
use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;
use sqlx::SqlitePool;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::RulesConfig;
use crate::errors::{AppError, AppResult};
use crate::events::{self, EventBus};
use crate::guard::{require_object_permission, GuardState, PermissionGuard};
use crate::jwt::JwtConfig;
use crate::models::parcel::{self, Parcel, ParcelLoader};
use crate::routes::{auth, health, parcels, rules};
use crate::rules::loader;
use crate::rules::{
    permissions, roles, BackendChain, CentralHooks, Engine, EntityCatalog, ModelPermissionBackend, RuleRegistry,
    RuleStore, RulesStore,
};

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub jwt: Arc<JwtConfig>,
    pub engine: Arc<Engine>,
    pub backends: BackendChain,
    pub catalog: Arc<EntityCatalog>,
    pub config: Arc<RulesConfig>,
    pub event_bus: EventBus,
    /// Present when rules are persisted (`RULES_STORE=database`).
    pub store: Option<RuleStore>,
}

impl AppState {
    /// Wire the registry, engine and backends, then load rules from the
    /// database and the configured rules directory.
    pub async fn build(pool: SqlitePool, jwt: JwtConfig, config: RulesConfig) -> AppResult<Self> {
        let catalog = Arc::new(entity_catalog());
        let registry = Arc::new(RuleRegistry::new(config.duplicates));

        let store = match config.store {
            RulesStore::Database => Some(RuleStore::new(pool.clone())),
            RulesStore::Memory => None,
        };
        if let Some(store) = &store {
            store.hydrate(&registry, &catalog).await?;
        }

        let (event_bus, rx) = events::init_event_bus();
        tokio::spawn(events::start_audit_listener(rx, pool.clone()));

        if let Some(root) = &config.rules_root {
            let report = loader::sync_dir(root, &registry, &catalog)?;
            for rule in &report.registered {
                if let Some(store) = &store {
                    store.save(rule).await?;
                }
                events::log_activity(&event_bus, "synced", None, &**rule);
            }
            tracing::info!(
                root = %root.display(),
                registered = report.registered.len(),
                overwritten = report.overwritten,
                unchanged = report.unchanged,
                skipped = report.skipped.len(),
                "rules synced"
            );
        }

        let engine = Arc::new(Engine::new(registry, config.engine.clone()).with_hooks(CentralHooks::builtin()));
        let backends = BackendChain::standard(Arc::clone(&engine), model_backend());

        Ok(Self {
            pool,
            jwt: Arc::new(jwt),
            engine,
            backends,
            catalog,
            config: Arc::new(config),
            event_bus,
            store,
        })
    }
}

/// Entity types rules can be declared on, grouped by application.
pub fn entity_catalog() -> EntityCatalog {
    EntityCatalog::new().with_entity(parcel::APPLICATION, Arc::new(Parcel::shape()), Some(ParcelLoader::shared()))
}

fn model_backend() -> ModelPermissionBackend {
    ModelPermissionBackend::new()
        .grant_role(roles::SHIPPER, [permissions::CAN_SHIP.to_string()])
        .grant_role(roles::RULES_ADMIN, [permissions::RULES_MANAGE.to_string()])
}

pub async fn create_app(pool: SqlitePool) -> Result<Router, AppError> {
    let jwt_config = JwtConfig::from_env()?;
    let rules_config = RulesConfig::from_env()?;
    create_app_with(pool, jwt_config, rules_config).await
}

pub async fn create_app_with(pool: SqlitePool, jwt: JwtConfig, config: RulesConfig) -> Result<Router, AppError> {
    let state = AppState::build(pool, jwt, config).await?;
    router(state)
}

pub fn router(state: AppState) -> Result<Router, AppError> {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_origin(Any)
        .allow_headers(Any);

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/me", get(auth::me));

    let ship_guard = GuardState::new(
        state.clone(),
        PermissionGuard::new(parcel::ENTITY_TYPE, permissions::CAN_SHIP)?.return_403(true),
    );
    let trash_guard = GuardState::new(state.clone(), PermissionGuard::new(parcel::ENTITY_TYPE, permissions::CAN_TRASH)?);

    let parcel_routes = Router::new()
        .route("/", post(parcels::create_parcel))
        .route("/:parcel_id", get(parcels::get_parcel))
        .merge(
            Router::new()
                .route("/:parcel_id/ship", post(parcels::ship_parcel))
                .route_layer(from_fn_with_state(ship_guard, require_object_permission)),
        )
        .merge(
            Router::new()
                .route("/:parcel_id/trash", post(parcels::trash_parcel))
                .route_layer(from_fn_with_state(trash_guard, require_object_permission)),
        );

    let rule_routes = Router::new()
        .route("/", get(rules::list_rules).post(rules::register_rule))
        .route("/check", post(rules::check_permission))
        .route("/:entity_type/:codename", get(rules::get_rule).delete(rules::delete_rule));

    let router = Router::new()
        .route("/api/health", get(health::health))
        .nest("/auth", auth_routes)
        .nest("/parcels", parcel_routes)
        .nest("/rules", rule_routes)
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    Ok(router)
}
