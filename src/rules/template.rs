//! `has_perm` template tag.
//!
//! ```text
//! has_perm [PRINCIPAL] TARGET.CODENAME [as VAR]
//! ```
//!
//! Binds the decision into the rendering context. `PRINCIPAL` defaults to
//! `user` and `VAR` to `TARGET_CODENAME`.

use std::collections::HashMap;

use super::backend::BackendChain;
use super::entity::Entity;
use super::error::{RulesError, RulesResult};
use super::principal::Principal;

const TAG_NAME: &str = "has_perm";
const DEFAULT_PRINCIPAL: &str = "user";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermsNode {
    pub principal: String,
    pub target: String,
    pub codename: String,
    pub var_name: String,
}

impl PermsNode {
    /// Parse the contents of a tag, e.g. `has_perm user parcel.can_ship as ok`.
    pub fn parse(contents: &str) -> RulesResult<Self> {
        let bits: Vec<&str> = contents.split_whitespace().collect();
        let Some((&tag, args)) = bits.split_first() else {
            return Err(syntax(contents));
        };
        if tag != TAG_NAME {
            return Err(syntax(contents));
        }

        let (args, var_name) = match args {
            [head @ .., "as", var] => (head, Some(*var)),
            _ => (args, None),
        };

        let (principal, perm) = match args {
            [perm] => (DEFAULT_PRINCIPAL, *perm),
            [principal, perm] => (*principal, *perm),
            _ => return Err(syntax(contents)),
        };

        let (target, codename) = perm.split_once('.').ok_or_else(|| syntax(contents))?;

        let idents = [Some(principal), Some(target), Some(codename), var_name];
        if !idents.iter().flatten().all(|s| is_word(s)) {
            return Err(syntax(contents));
        }

        Ok(Self {
            principal: principal.to_string(),
            target: target.to_string(),
            codename: codename.to_string(),
            var_name: var_name
                .map(str::to_string)
                .unwrap_or_else(|| format!("{}_{}", target, codename)),
        })
    }

    /// Evaluate the permission and bind the result as `var_name`.
    pub fn render(&self, context: &mut TemplateContext<'_>, backends: &BackendChain) -> RulesResult<()> {
        let principal = context
            .principals
            .get(&self.principal)
            .ok_or_else(|| unknown_variable(&self.principal))?;
        let target = *context.targets.get(&self.target).ok_or_else(|| unknown_variable(&self.target))?;

        let decision = backends.has_perm(principal, &self.codename, Some(target))?;
        context.flags.insert(self.var_name.clone(), decision);
        Ok(())
    }
}

/// Variables visible to a rendered tag.
#[derive(Default)]
pub struct TemplateContext<'a> {
    principals: HashMap<String, Principal>,
    targets: HashMap<String, &'a dyn Entity>,
    flags: HashMap<String, bool>,
}

impl<'a> TemplateContext<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context whose `user` is the current principal.
    pub fn for_user(user: Principal) -> Self {
        let mut ctx = Self::new();
        ctx.insert_principal(DEFAULT_PRINCIPAL, user);
        ctx
    }

    pub fn insert_principal(&mut self, name: impl Into<String>, principal: Principal) {
        self.principals.insert(name.into(), principal);
    }

    pub fn insert_target(&mut self, name: impl Into<String>, target: &'a dyn Entity) {
        self.targets.insert(name.into(), target);
    }

    pub fn flag(&self, name: &str) -> Option<bool> {
        self.flags.get(name).copied()
    }
}

fn is_word(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || c == '_')
}

fn syntax(contents: &str) -> RulesError {
    RulesError::TemplateSyntax(contents.trim().to_string())
}

fn unknown_variable(name: &str) -> RulesError {
    RulesError::TemplateSyntax(format!("variable '{}' is not in the context", name))
}
