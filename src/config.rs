use std::path::PathBuf;
use std::str::FromStr;

use uuid::Uuid;

use crate::errors::AppError;
use crate::rules::{DuplicatePolicy, EngineConfig, HookResultPolicy, MissingRulePolicy, RulesStore};

pub const DEFAULT_LOGIN_URL: &str = "/accounts/login/";

/// Rule engine settings read from the environment.
///
/// | variable                 | meaning                                   |
/// |--------------------------|-------------------------------------------|
/// | `RULES_STORE`            | `memory` (default) or `database`          |
/// | `RULES_MISSING`          | `cascade` or `raise`, default per store    |
/// | `RULES_DUPLICATES`       | `overwrite` (default) or `reject`         |
/// | `RULES_HOOK_RESULT`      | `continue` (default) or `reject`          |
/// | `CENTRAL_AUTHORIZATIONS` | name of the central hook, optional        |
/// | `ANONYMOUS_USER_ID`      | uuid evaluated for anonymous callers      |
/// | `RULES_ROOT`             | directory of per-application rules files  |
/// | `LOGIN_URL`              | redirect target for denied guarded routes |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RulesConfig {
    pub store: RulesStore,
    pub duplicates: DuplicatePolicy,
    pub engine: EngineConfig,
    pub rules_root: Option<PathBuf>,
    pub login_url: String,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            store: RulesStore::default(),
            duplicates: DuplicatePolicy::default(),
            engine: EngineConfig::default(),
            rules_root: None,
            login_url: DEFAULT_LOGIN_URL.to_string(),
        }
    }
}

impl RulesConfig {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key/value source; blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let store: RulesStore = parse_or_default(get("RULES_STORE"))?;
        let missing_rule = match get("RULES_MISSING") {
            Some(raw) => parse::<MissingRulePolicy>(&raw)?,
            None => store.default_missing_policy(),
        };

        let anonymous_user_id = get("ANONYMOUS_USER_ID")
            .map(|raw| {
                Uuid::parse_str(&raw).map_err(|_| AppError::configuration("ANONYMOUS_USER_ID must be a valid uuid"))
            })
            .transpose()?;

        Ok(Self {
            store,
            duplicates: parse_or_default(get("RULES_DUPLICATES"))?,
            engine: EngineConfig {
                missing_rule,
                hook_result: parse_or_default(get("RULES_HOOK_RESULT"))?,
                central_hook: get("CENTRAL_AUTHORIZATIONS"),
                anonymous_user_id,
            },
            rules_root: get("RULES_ROOT").map(PathBuf::from),
            login_url: get("LOGIN_URL").unwrap_or_else(|| DEFAULT_LOGIN_URL.to_string()),
        })
    }

    pub fn with_store(mut self, store: RulesStore) -> Self {
        self.store = store;
        self.engine.missing_rule = store.default_missing_policy();
        self
    }

    pub fn with_duplicates(mut self, duplicates: DuplicatePolicy) -> Self {
        self.duplicates = duplicates;
        self
    }

    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_rules_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.rules_root = Some(root.into());
        self
    }
}

fn parse<T>(raw: &str) -> Result<T, AppError>
where
    T: FromStr<Err = crate::rules::RulesError>,
{
    raw.parse::<T>().map_err(|err| AppError::configuration(err.to_string()))
}

fn parse_or_default<T>(raw: Option<String>) -> Result<T, AppError>
where
    T: FromStr<Err = crate::rules::RulesError> + Default,
{
    raw.map(|v| parse(&v)).transpose().map(Option::unwrap_or_default)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<RulesConfig, AppError> {
        let vars: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        RulesConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn empty_environment_gives_in_memory_cascade() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config, RulesConfig::default());
        assert_eq!(config.engine.missing_rule, MissingRulePolicy::Cascade);
    }

    #[test]
    fn database_store_defaults_to_raise() {
        let config = config_from(&[("RULES_STORE", "database")]).unwrap();
        assert_eq!(config.engine.missing_rule, MissingRulePolicy::Raise);

        let overridden = config_from(&[("RULES_STORE", "database"), ("RULES_MISSING", "cascade")]).unwrap();
        assert_eq!(overridden.engine.missing_rule, MissingRulePolicy::Cascade);
    }

    #[test]
    fn reads_hook_and_anonymous_identity() {
        let anon = Uuid::new_v4();
        let anon_s = anon.to_string();
        let config = config_from(&[
            ("CENTRAL_AUTHORIZATIONS", "superusers"),
            ("RULES_HOOK_RESULT", "reject"),
            ("ANONYMOUS_USER_ID", anon_s.as_str()),
            ("RULES_DUPLICATES", "strict"),
            ("LOGIN_URL", "/foobar/"),
        ])
        .unwrap();

        assert_eq!(config.engine.central_hook.as_deref(), Some("superusers"));
        assert_eq!(config.engine.hook_result, HookResultPolicy::Reject);
        assert_eq!(config.engine.anonymous_user_id, Some(anon));
        assert_eq!(config.duplicates, DuplicatePolicy::Reject);
        assert_eq!(config.login_url, "/foobar/");
    }

    #[test]
    fn blank_values_are_unset() {
        let config = config_from(&[("CENTRAL_AUTHORIZATIONS", "  "), ("RULES_ROOT", "")]).unwrap();
        assert!(config.engine.central_hook.is_none());
        assert!(config.rules_root.is_none());
    }

    #[test]
    fn invalid_values_are_configuration_errors() {
        assert!(matches!(config_from(&[("RULES_MISSING", "maybe")]), Err(AppError::Configuration(_))));
        assert!(matches!(config_from(&[("ANONYMOUS_USER_ID", "nobody")]), Err(AppError::Configuration(_))));
    }
}
