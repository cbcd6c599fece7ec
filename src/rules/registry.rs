//! Rule registry.
//!
//! Process-wide store of validated rules keyed by `(entity type, codename)`.
//! Reads are concurrent; every write takes the lock for the whole
//! check-then-replace step, so two registrations of the same key never
//! interleave their overwrite warning and insertion.
//!
//! Lock order is `rules` then `lazy`.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::entity::EntityType;
use super::error::{RulesError, RulesResult};
use super::rule::{Rule, RuleKey, RuleSpec};
use super::DuplicatePolicy;

/// Outcome of a successful registration.
///
/// `replaced` is set exactly when the overwrite warning was logged.
#[derive(Debug, Clone)]
pub struct Registration {
    pub rule: Arc<Rule>,
    /// The different rule this registration overwrote, if any.
    pub replaced: Option<Arc<Rule>>,
    /// An identical rule was already stored; nothing changed.
    pub unchanged: bool,
}

impl Registration {
    pub fn overwrote(&self) -> bool {
        self.replaced.is_some()
    }
}

struct LazyDeclaration {
    entity: Arc<dyn EntityType>,
    spec: RuleSpec,
}

pub struct RuleRegistry {
    rules: RwLock<HashMap<RuleKey, Arc<Rule>>>,
    lazy: Mutex<HashMap<RuleKey, LazyDeclaration>>,
    duplicates: DuplicatePolicy,
}

impl Default for RuleRegistry {
    fn default() -> Self {
        Self::new(DuplicatePolicy::default())
    }
}

impl RuleRegistry {
    pub fn new(duplicates: DuplicatePolicy) -> Self {
        Self {
            rules: RwLock::new(HashMap::new()),
            lazy: Mutex::new(HashMap::new()),
            duplicates,
        }
    }

    /// Validate `spec` against `entity` and store it.
    ///
    /// Shape errors are returned before the registry is touched. Registering
    /// a rule identical to the stored one is a silent no-op under either
    /// duplicate policy; only a changed definition counts as a duplicate.
    pub fn register(&self, entity: &dyn EntityType, spec: RuleSpec) -> RulesResult<Registration> {
        let rule = spec.validate(entity)?;
        let mut rules = self.rules.write();
        self.insert(&mut rules, rule)
    }

    fn insert(&self, rules: &mut HashMap<RuleKey, Arc<Rule>>, rule: Rule) -> RulesResult<Registration> {
        let key = rule.key();

        match rules.get(&key) {
            Some(existing) if **existing == rule => {
                return Ok(Registration {
                    rule: Arc::clone(existing),
                    replaced: None,
                    unchanged: true,
                });
            }
            Some(_) if self.duplicates == DuplicatePolicy::Reject => {
                return Err(RulesError::DuplicateRule {
                    codename: key.codename,
                    entity_type: key.entity_type,
                });
            }
            Some(_) => {
                tracing::warn!(
                    entity_type = %key.entity_type,
                    codename = %key.codename,
                    "careful: rule being overwritten, make sure it has not been registered twice"
                );
            }
            None => {
                tracing::debug!(
                    entity_type = %key.entity_type,
                    codename = %key.codename,
                    field_name = %rule.field_name(),
                    "rule registered"
                );
            }
        }

        let rule = Arc::new(rule);
        let replaced = rules.insert(key, Arc::clone(&rule));
        Ok(Registration {
            rule,
            replaced,
            unchanged: false,
        })
    }

    pub fn lookup(&self, entity_type: &str, codename: &str) -> Option<Arc<Rule>> {
        self.rules.read().get(&RuleKey::new(entity_type, codename)).cloned()
    }

    /// Remove a rule. Removing an absent rule is a no-op.
    pub fn unregister(&self, entity_type: &str, codename: &str) -> Option<Arc<Rule>> {
        let key = RuleKey::new(entity_type, codename);
        let mut rules = self.rules.write();
        self.lazy.lock().remove(&key);
        let removed = rules.remove(&key);
        if removed.is_some() {
            tracing::debug!(entity_type = %key.entity_type, codename = %key.codename, "rule unregistered");
        }
        removed
    }

    /// Remember a rule to be registered on first use.
    ///
    /// Any rule already stored under the same key is dropped, so the
    /// declaration is what a later lookup sees.
    pub fn declare_lazy(&self, entity: Arc<dyn EntityType>, spec: RuleSpec) {
        let key = RuleKey::new(entity.type_name(), &spec.codename);
        let mut rules = self.rules.write();
        rules.remove(&key);
        self.lazy.lock().insert(key, LazyDeclaration { entity, spec });
    }

    pub fn has_lazy(&self, entity_type: &str, codename: &str) -> bool {
        self.lazy.lock().contains_key(&RuleKey::new(entity_type, codename))
    }

    /// Look a rule up, registering a pending lazy declaration first if one exists.
    ///
    /// The declaration is consumed and the rule inserted under one write
    /// lock, so concurrent callers either see the rule or register it.
    /// A declaration that fails validation stays pending.
    pub fn lookup_or_register_lazy(&self, entity_type: &str, codename: &str) -> RulesResult<Option<Arc<Rule>>> {
        if let Some(rule) = self.lookup(entity_type, codename) {
            return Ok(Some(rule));
        }

        let key = RuleKey::new(entity_type, codename);
        let mut rules = self.rules.write();
        if let Some(rule) = rules.get(&key) {
            return Ok(Some(Arc::clone(rule)));
        }

        let mut lazy = self.lazy.lock();
        let Some(decl) = lazy.get(&key) else {
            return Ok(None);
        };

        tracing::debug!(entity_type = %key.entity_type, codename = %key.codename, "registering lazy rule");
        let rule = decl.spec.clone().validate(decl.entity.as_ref())?;
        lazy.remove(&key);
        drop(lazy);

        Ok(Some(self.insert(&mut rules, rule)?.rule))
    }

    /// Snapshot of every stored rule, ordered by key.
    pub fn rules(&self) -> Vec<Arc<Rule>> {
        let mut rules: Vec<Arc<Rule>> = self.rules.read().values().cloned().collect();
        rules.sort_by(|a, b| a.key().cmp(&b.key()));
        rules
    }

    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.read().is_empty()
    }
}

impl fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleRegistry")
            .field("rules", &self.len())
            .field("lazy", &self.lazy.lock().len())
            .field("duplicates", &self.duplicates)
            .finish()
    }
}
