use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use super::engine::Engine;
use super::entity::Entity;
use super::error::RulesResult;
use super::principal::Principal;

/// Pluggable authorization backend.
///
/// `Ok(false)` means "not granted here" and lets a [`BackendChain`] ask the
/// next backend. Errors are fatal to the whole check.
pub trait PermissionBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn has_perm(&self, principal: &Principal, permission: &str, target: Option<&dyn Entity>) -> RulesResult<bool>;
}

/// Global (non-object) permissions carried by the principal.
///
/// Evaluation order:
/// 1. inactive principal -> deny
/// 2. super_admin -> allow
/// 3. direct permission -> allow
/// 4. permission granted to one of the principal's roles -> allow
/// 5. deny
#[derive(Debug, Clone, Default)]
pub struct ModelPermissionBackend {
    role_permissions: HashMap<String, HashSet<String>>,
}

impl ModelPermissionBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn grant_role(mut self, role: impl Into<String>, permissions: impl IntoIterator<Item = String>) -> Self {
        self.role_permissions.entry(role.into()).or_default().extend(permissions);
        self
    }

    fn role_grants(&self, principal: &Principal, permission: &str) -> bool {
        principal
            .roles
            .iter()
            .filter_map(|role| self.role_permissions.get(role))
            .any(|perms| perms.contains(permission))
    }
}

impl PermissionBackend for ModelPermissionBackend {
    fn name(&self) -> &'static str {
        "model"
    }

    fn has_perm(&self, principal: &Principal, permission: &str, _target: Option<&dyn Entity>) -> RulesResult<bool> {
        if !principal.is_active {
            return Ok(false);
        }

        if principal.is_super_admin() {
            tracing::debug!(
                user_id = %principal.user_id,
                permission = %permission,
                "super_admin bypass"
            );
            return Ok(true);
        }

        if principal.has_permission(permission) || self.role_grants(principal, permission) {
            tracing::debug!(
                user_id = %principal.user_id,
                permission = %permission,
                "global permission match"
            );
            return Ok(true);
        }

        Ok(false)
    }
}

/// Per-object rules, delegated to the evaluation engine.
#[derive(Debug, Clone)]
pub struct ObjectPermissionBackend {
    engine: Arc<Engine>,
}

impl ObjectPermissionBackend {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }
}

impl PermissionBackend for ObjectPermissionBackend {
    fn name(&self) -> &'static str {
        "object"
    }

    fn has_perm(&self, principal: &Principal, permission: &str, target: Option<&dyn Entity>) -> RulesResult<bool> {
        self.engine.evaluate(principal, permission, target)
    }
}

/// Ordered list of backends; the first grant wins.
#[derive(Clone, Default)]
pub struct BackendChain {
    backends: Vec<Arc<dyn PermissionBackend>>,
}

impl BackendChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(mut self, backend: Arc<dyn PermissionBackend>) -> Self {
        self.backends.push(backend);
        self
    }

    /// Model backend first, then object rules.
    pub fn standard(engine: Arc<Engine>, model: ModelPermissionBackend) -> Self {
        Self::new()
            .with_backend(Arc::new(model))
            .with_backend(Arc::new(ObjectPermissionBackend::new(engine)))
    }

    pub fn has_perm(&self, principal: &Principal, permission: &str, target: Option<&dyn Entity>) -> RulesResult<bool> {
        for backend in &self.backends {
            if backend.has_perm(principal, permission, target)? {
                tracing::debug!(
                    user_id = %principal.user_id,
                    permission = %permission,
                    backend = backend.name(),
                    "permission granted"
                );
                return Ok(true);
            }
        }

        tracing::debug!(
            user_id = %principal.user_id,
            permission = %permission,
            "permission denied"
        );
        Ok(false)
    }
}

impl std::fmt::Debug for BackendChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.backends.iter().map(|b| b.name()).collect();
        f.debug_struct("BackendChain").field("backends", &names).finish()
    }
}
