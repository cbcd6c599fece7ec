//! Central authorization hooks.
//!
//! A hook sees `(principal, codename)` before any per-object rule. A JSON
//! boolean result is final; anything else means "no opinion" (or an error,
//! depending on [`HookResultPolicy`](super::HookResultPolicy)).

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use super::principal::Principal;

pub type HookFn = Arc<dyn Fn(&Principal, &str) -> anyhow::Result<Value> + Send + Sync>;

pub const SUPERUSERS: &str = "superusers";
pub const INACTIVE_DENIED: &str = "inactive_denied";

/// Named hooks the configuration can select from.
#[derive(Clone, Default)]
pub struct CentralHooks {
    hooks: HashMap<String, HookFn>,
}

impl CentralHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hooks shipped with the service.
    pub fn builtin() -> Self {
        Self::new()
            .with_hook(SUPERUSERS, |principal, _codename| {
                Ok(if principal.is_active && principal.is_super_admin() {
                    Value::Bool(true)
                } else {
                    Value::Null
                })
            })
            .with_hook(INACTIVE_DENIED, |principal, _codename| {
                Ok(if principal.is_active { Value::Null } else { Value::Bool(false) })
            })
    }

    pub fn with_hook<F>(mut self, name: impl Into<String>, hook: F) -> Self
    where
        F: Fn(&Principal, &str) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.insert(name, hook);
        self
    }

    pub fn insert<F>(&mut self, name: impl Into<String>, hook: F)
    where
        F: Fn(&Principal, &str) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.hooks.insert(name.into(), Arc::new(hook));
    }

    pub fn get(&self, name: &str) -> Option<HookFn> {
        self.hooks.get(name).cloned()
    }

    pub fn names(&self) -> BTreeSet<&str> {
        self.hooks.keys().map(String::as_str).collect()
    }
}

impl fmt::Debug for CentralHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CentralHooks").field("hooks", &self.names()).finish()
    }
}
