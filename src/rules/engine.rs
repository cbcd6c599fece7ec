use std::borrow::Cow;
use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use super::entity::{Entity, Member};
use super::error::{RulesError, RulesResult};
use super::hooks::CentralHooks;
use super::principal::Principal;
use super::registry::RuleRegistry;
use super::rule::Rule;
use super::{HookResultPolicy, MissingRulePolicy};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineConfig {
    pub missing_rule: MissingRulePolicy,
    pub hook_result: HookResultPolicy,
    /// Name of the central hook to consult, looked up at call time.
    pub central_hook: Option<String>,
    /// Identity evaluated in place of anonymous callers.
    pub anonymous_user_id: Option<Uuid>,
}

impl EngineConfig {
    pub fn with_missing_rule(mut self, policy: MissingRulePolicy) -> Self {
        self.missing_rule = policy;
        self
    }

    pub fn with_hook_result(mut self, policy: HookResultPolicy) -> Self {
        self.hook_result = policy;
        self
    }

    pub fn with_central_hook(mut self, name: impl Into<String>) -> Self {
        self.central_hook = Some(name.into());
        self
    }

    pub fn with_anonymous_user(mut self, user_id: Uuid) -> Self {
        self.anonymous_user_id = Some(user_id);
        self
    }
}

/// Permission evaluation engine.
///
/// Stateless per call: all state lives in the shared registry and in the
/// caller's principal and target.
#[derive(Debug)]
pub struct Engine {
    registry: Arc<RuleRegistry>,
    hooks: CentralHooks,
    config: EngineConfig,
}

impl Engine {
    pub fn new(registry: Arc<RuleRegistry>, config: EngineConfig) -> Self {
        Self {
            registry,
            hooks: CentralHooks::new(),
            config,
        }
    }

    pub fn with_hooks(mut self, hooks: CentralHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn registry(&self) -> &Arc<RuleRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Decide whether `principal` holds `codename` on `target`.
    ///
    /// A missing target is `Ok(false)`. A missing rule is `Ok(false)` or
    /// `NonexistentPermission` depending on [`MissingRulePolicy`]. Stale
    /// fields, non-boolean results and hook misconfiguration are errors.
    pub fn evaluate(&self, principal: &Principal, codename: &str, target: Option<&dyn Entity>) -> RulesResult<bool> {
        let Some(target) = target else {
            return Ok(false);
        };

        let principal = self.effective_principal(principal);
        let entity_type = target.type_name();

        if let Some(decision) = self.consult_central(&principal, codename, entity_type)? {
            tracing::debug!(
                user_id = %principal.user_id,
                permission = %codename,
                decision,
                "central authorization decided"
            );
            return Ok(decision);
        }

        let Some(rule) = self.registry.lookup(entity_type, codename) else {
            return match self.config.missing_rule {
                MissingRulePolicy::Cascade => {
                    tracing::debug!(
                        entity_type = %entity_type,
                        permission = %codename,
                        "no rule registered, cascading"
                    );
                    Ok(false)
                }
                MissingRulePolicy::Raise => Err(RulesError::nonexistent_permission(codename, entity_type)),
            };
        };

        let decision = resolve_decision(&rule, &principal, target)?;
        tracing::debug!(
            user_id = %principal.user_id,
            entity_type = %entity_type,
            permission = %codename,
            field_name = %rule.field_name(),
            decision,
            "rule evaluated"
        );
        Ok(decision)
    }

    fn effective_principal<'p>(&self, principal: &'p Principal) -> Cow<'p, Principal> {
        match self.config.anonymous_user_id {
            Some(user_id) if principal.is_anonymous() => {
                Cow::Owned(Principal::new(user_id).with_name("anonymous"))
            }
            _ => Cow::Borrowed(principal),
        }
    }

    fn consult_central(&self, principal: &Principal, codename: &str, entity_type: &str) -> RulesResult<Option<bool>> {
        let Some(name) = self.config.central_hook.as_deref() else {
            return Ok(None);
        };

        let hook = self.hooks.get(name).ok_or_else(|| {
            RulesError::configuration(format!(
                "central authorization hook '{}' is not registered (known: {:?})",
                name,
                self.hooks.names()
            ))
        })?;

        let outcome = hook(principal, codename).map_err(|source| RulesError::Hook {
            name: name.to_string(),
            source,
        })?;

        match outcome {
            Value::Bool(decision) => Ok(Some(decision)),
            _ if self.config.hook_result == HookResultPolicy::Reject => Err(RulesError::NotBooleanPermission {
                source_kind: "central authorization hook",
                codename: codename.to_string(),
                entity_type: entity_type.to_string(),
                field_name: name.to_string(),
            }),
            _ => Ok(None),
        }
    }
}

fn resolve_decision(rule: &Rule, principal: &Principal, target: &dyn Entity) -> RulesResult<bool> {
    let entity_type = target.type_name();
    let member = target
        .resolve(rule.field_name())
        .ok_or_else(|| RulesError::nonexistent_field(rule.codename(), entity_type, rule.field_name()))?;

    let (source_kind, value) = match member {
        Member::Value(value) => ("attribute", value),
        Member::Method0(method) => ("callable", method().map_err(|source| member_error(rule, entity_type, source))?),
        Member::Method1(method) => (
            "callable",
            method(principal).map_err(|source| member_error(rule, entity_type, source))?,
        ),
    };

    value.as_bool().ok_or_else(|| RulesError::NotBooleanPermission {
        source_kind,
        codename: rule.codename().to_string(),
        entity_type: entity_type.to_string(),
        field_name: rule.field_name().to_string(),
    })
}

fn member_error(rule: &Rule, entity_type: &str, source: anyhow::Error) -> RulesError {
    RulesError::Member {
        entity_type: entity_type.to_string(),
        field_name: rule.field_name().to_string(),
        source,
    }
}
