pub type RulesResult<T> = Result<T, RulesError>;

/// Failures raised by rule registration and permission evaluation.
///
/// Denials are never errors. "No target" and "no rule" (under the cascade
/// policy) are plain `Ok(false)` outcomes.
#[derive(thiserror::Error, Debug)]
pub enum RulesError {
    /// Misconfiguration: bad hook name, empty codename, missing view parameter.
    #[error("rules configuration error: {0}")]
    Configuration(String),
    #[error("method {field_name} from rule {codename} in entity {entity_type} has too many parameters ({arity})")]
    TooManyParameters {
        codename: String,
        entity_type: String,
        field_name: String,
        arity: usize,
    },
    #[error("permission {codename} does not exist for entity {entity_type}")]
    NonexistentPermission { codename: String, entity_type: String },
    #[error("field_name {field_name} of rule {codename} does not exist in entity {entity_type}")]
    NonexistentFieldName {
        codename: String,
        entity_type: String,
        field_name: String,
    },
    #[error("{source_kind} {field_name} from entity {entity_type} on rule {codename} does not return a boolean value")]
    NotBooleanPermission {
        source_kind: &'static str,
        codename: String,
        entity_type: String,
        field_name: String,
    },
    #[error("rule {codename} is already registered for entity {entity_type}")]
    DuplicateRule { codename: String, entity_type: String },
    #[error("incorrect 'has_perm' template tag syntax: {0}")]
    TemplateSyntax(String),
    #[error("central authorization hook {name} failed")]
    Hook {
        name: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("member {field_name} of entity {entity_type} failed")]
    Member {
        entity_type: String,
        field_name: String,
        #[source]
        source: anyhow::Error,
    },
}

impl RulesError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn nonexistent_permission(codename: &str, entity_type: &str) -> Self {
        Self::NonexistentPermission {
            codename: codename.to_string(),
            entity_type: entity_type.to_string(),
        }
    }

    pub fn nonexistent_field(codename: &str, entity_type: &str, field_name: &str) -> Self {
        Self::NonexistentFieldName {
            codename: codename.to_string(),
            entity_type: entity_type.to_string(),
            field_name: field_name.to_string(),
        }
    }

    /// True for the base misconfiguration category, `TooManyParameters` included.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            RulesError::Configuration(_) | RulesError::TooManyParameters { .. } | RulesError::Hook { .. }
        )
    }

    /// Short machine-readable name, used in API error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            RulesError::Configuration(_) => "rules_error",
            RulesError::TooManyParameters { .. } => "too_many_parameters",
            RulesError::NonexistentPermission { .. } => "nonexistent_permission",
            RulesError::NonexistentFieldName { .. } => "nonexistent_field_name",
            RulesError::NotBooleanPermission { .. } => "not_boolean_permission",
            RulesError::DuplicateRule { .. } => "duplicate_rule",
            RulesError::TemplateSyntax(_) => "template_syntax",
            RulesError::Hook { .. } => "hook_error",
            RulesError::Member { .. } => "member_error",
        }
    }
}
