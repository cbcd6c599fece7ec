//! Object rules - per-object permission registry and evaluation engine
//!
//! This module implements row-level authorization where the decision comes
//! from the target entity itself:
//! - Rule registry keyed by (entity type, codename), validated on registration
//! - Evaluation engine resolving a rule against a loaded target
//! - Optional central authorization hook that can short-circuit decisions
//! - Backend chain, template tag, declarative rule sources and durable storage

pub mod backend;
pub mod engine;
pub mod entity;
pub mod error;
pub mod hooks;
pub mod loader;
pub mod principal;
pub mod registry;
pub mod rule;
pub mod store;
pub mod template;

pub use backend::{BackendChain, ModelPermissionBackend, ObjectPermissionBackend, PermissionBackend};
pub use engine::{Engine, EngineConfig};
pub use entity::{Entity, EntityCatalog, EntityLoader, EntityShape, EntityType, Member};
pub use error::{RulesError, RulesResult};
pub use hooks::CentralHooks;
pub use principal::Principal;
pub use registry::{Registration, RuleRegistry};
pub use rule::{Rule, RuleKey, RuleSpec};
pub use store::RuleStore;

use std::str::FromStr;

/// What evaluation does when no rule exists for the target's type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingRulePolicy {
    /// Return false so other backends in a chain can decide
    #[default]
    Cascade,
    /// Fail with `NonexistentPermission`
    Raise,
}

/// What evaluation does when the central hook returns a non-boolean
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HookResultPolicy {
    /// Treat it as "no opinion" and keep checking rules
    #[default]
    Continue,
    /// Fail with `NotBooleanPermission`
    Reject,
}

/// What registration does when the key is already taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// Replace the stored rule and log a warning (interactive/test reloads)
    #[default]
    Overwrite,
    /// Fail with `DuplicateRule` (strict production boot)
    Reject,
}

/// Where rule definitions live between restarts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RulesStore {
    #[default]
    Memory,
    Database,
}

impl RulesStore {
    /// Durable rules make a missing rule a real misconfiguration.
    pub fn default_missing_policy(self) -> MissingRulePolicy {
        match self {
            RulesStore::Memory => MissingRulePolicy::Cascade,
            RulesStore::Database => MissingRulePolicy::Raise,
        }
    }
}

macro_rules! parse_policy {
    ($ty:ty, $what:literal, { $($text:literal => $variant:expr),+ $(,)? }) => {
        impl FromStr for $ty {
            type Err = RulesError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_lowercase().as_str() {
                    $($text => Ok($variant),)+
                    other => Err(RulesError::configuration(format!(
                        concat!("unknown ", $what, " '{}'"),
                        other
                    ))),
                }
            }
        }
    };
}

parse_policy!(MissingRulePolicy, "missing-rule policy", {
    "cascade" => MissingRulePolicy::Cascade,
    "raise" => MissingRulePolicy::Raise,
});

parse_policy!(HookResultPolicy, "hook result policy", {
    "continue" => HookResultPolicy::Continue,
    "reject" => HookResultPolicy::Reject,
});

parse_policy!(DuplicatePolicy, "duplicate policy", {
    "overwrite" => DuplicatePolicy::Overwrite,
    "reject" => DuplicatePolicy::Reject,
    "strict" => DuplicatePolicy::Reject,
});

parse_policy!(RulesStore, "rules store", {
    "memory" => RulesStore::Memory,
    "database" => RulesStore::Database,
    "db" => RulesStore::Database,
});

/// Well-known role names
pub mod roles {
    pub const SUPER_ADMIN: &str = "super_admin";
    pub const SHIPPER: &str = "shipper";
    pub const RULES_ADMIN: &str = "rules_admin";
}

/// Well-known permission codenames
pub mod permissions {
    pub const CAN_SHIP: &str = "can_ship";
    pub const CAN_TRASH: &str = "can_trash";
    pub const RULES_MANAGE: &str = "rules.manage";
}
