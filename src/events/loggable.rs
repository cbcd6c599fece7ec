use serde::{Deserialize, Serialize};

use crate::rules::Rule;

/// Retention class of an audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Never trimmed
    Critical,
    /// Kept for the default retention window
    #[default]
    Important,
    /// First to go when the trail is trimmed
    Noise,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Important => "important",
            Severity::Noise => "noise",
        }
    }
}

/// Something whose changes are written to the audit trail.
pub trait Loggable: Serialize + Send + Sync {
    /// Prefix of event names, e.g. `rule` in `rule.registered`.
    fn entity_type() -> &'static str;

    /// Namespace the subject lives in.
    fn subject_scope(&self) -> &str;

    /// Identifier of the subject inside its scope.
    fn subject_key(&self) -> &str;

    fn severity(&self) -> Severity {
        Severity::Important
    }

    fn severity_for_action(&self, action: &str) -> Severity {
        match action {
            "deleted" => Severity::Critical,
            _ => self.severity(),
        }
    }
}

impl Loggable for Rule {
    fn entity_type() -> &'static str {
        "rule"
    }

    fn subject_scope(&self) -> &str {
        self.entity_type()
    }

    fn subject_key(&self) -> &str {
        self.codename()
    }

    fn severity_for_action(&self, action: &str) -> Severity {
        match action {
            "deleted" => Severity::Critical,
            // replayed from the rulesets on every boot
            "synced" => Severity::Noise,
            _ => self.severity(),
        }
    }
}
