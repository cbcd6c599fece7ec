use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::entity::EntityType;
use super::error::{RulesError, RulesResult};

/// A validated permission rule.
///
/// Only [`RuleSpec::validate`] builds one, so a `Rule` always names a member
/// that existed with an acceptable arity when it was registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Rule {
    #[schema(example = "can_ship")]
    codename: String,
    #[schema(example = "parcel")]
    entity_type: String,
    #[schema(example = "can_ship")]
    field_name: String,
    #[schema(example = "parcel_id")]
    view_param_pk: String,
    #[schema(example = "Only the supplier may ship a parcel")]
    description: String,
}

impl Rule {
    pub fn codename(&self) -> &str {
        &self.codename
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    pub fn view_param_pk(&self) -> &str {
        &self.view_param_pk
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn key(&self) -> RuleKey {
        RuleKey::new(&self.entity_type, &self.codename)
    }

    /// Candidate carrying the same fields, for re-registration.
    pub fn to_spec(&self) -> RuleSpec {
        RuleSpec {
            codename: self.codename.clone(),
            field_name: Some(self.field_name.clone()),
            view_param_pk: Some(self.view_param_pk.clone()),
            description: Some(self.description.clone()),
        }
    }
}

/// Registry key: `(entity type name, codename)`.
///
/// Codenames are trimmed here, so every lookup path agrees with registration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuleKey {
    pub entity_type: String,
    pub codename: String,
}

impl RuleKey {
    pub fn new(entity_type: &str, codename: &str) -> Self {
        Self {
            entity_type: entity_type.to_string(),
            codename: codename.trim().to_string(),
        }
    }
}

/// A rule as declared, before defaults and validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RuleSpec {
    #[schema(example = "can_ship")]
    pub codename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(example = "can_ship")]
    pub field_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(example = "parcel_id")]
    pub view_param_pk: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl RuleSpec {
    pub fn new(codename: impl Into<String>) -> Self {
        Self {
            codename: codename.into(),
            ..Self::default()
        }
    }

    pub fn field_name(mut self, field_name: impl Into<String>) -> Self {
        self.field_name = Some(field_name.into());
        self
    }

    pub fn view_param_pk(mut self, view_param_pk: impl Into<String>) -> Self {
        self.view_param_pk = Some(view_param_pk.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Apply defaults and check `field_name` against the live shape of `entity`.
    ///
    /// Callables are checked first: arity above one fails with
    /// `TooManyParameters`. Otherwise the name must be a declared field.
    pub fn validate(self, entity: &dyn EntityType) -> RulesResult<Rule> {
        let codename = self.codename.trim().to_string();
        if codename.is_empty() {
            return Err(RulesError::configuration("permission codename must be a non-empty string"));
        }

        let field_name = non_empty(self.field_name).unwrap_or_else(|| codename.clone());
        let view_param_pk = non_empty(self.view_param_pk).unwrap_or_else(|| entity.primary_key().to_string());
        let entity_type = entity.type_name().to_string();

        match entity.callable_arity(&field_name) {
            Some(arity) if arity > 1 => {
                return Err(RulesError::TooManyParameters {
                    codename,
                    entity_type,
                    field_name,
                    arity,
                });
            }
            Some(_) => {}
            None if entity.has_field(&field_name) => {}
            None => return Err(RulesError::nonexistent_field(&codename, &entity_type, &field_name)),
        }

        Ok(Rule {
            codename,
            entity_type,
            field_name,
            view_param_pk,
            description: self.description.unwrap_or_default(),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
