//! Declarative rule sources.
//!
//! Each application may ship a `rules.json` under `<root>/<application>/`:
//!
//! ```json
//! { "rules": [ { "codename": "can_ship", "entity_type": "parcel", "field_name": "can_ship" } ] }
//! ```
//!
//! An application without a rules file is skipped.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use super::entity::EntityCatalog;
use super::registry::RuleRegistry;
use super::rule::{Rule, RuleSpec};

pub const RULES_FILE: &str = "rules.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleDeclaration {
    pub codename: String,
    pub entity_type: String,
    #[serde(default)]
    pub field_name: Option<String>,
    #[serde(default)]
    pub view_param_pk: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl RuleDeclaration {
    pub fn to_spec(&self) -> RuleSpec {
        RuleSpec {
            codename: self.codename.clone(),
            field_name: self.field_name.clone(),
            view_param_pk: self.view_param_pk.clone(),
            description: self.description.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RulesFile {
    #[serde(default)]
    rules: Vec<RuleDeclaration>,
}

/// One application's parsed rules file.
#[derive(Debug, Clone)]
pub struct RuleSource {
    pub application: String,
    pub path: PathBuf,
    pub declarations: Vec<RuleDeclaration>,
}

#[derive(Debug, Default)]
pub struct SyncReport {
    /// New or changed rules; identical re-declarations are only counted.
    pub registered: Vec<Arc<Rule>>,
    pub overwritten: usize,
    pub unchanged: usize,
    /// Declarations naming an entity type the application does not have.
    pub skipped: Vec<String>,
}

/// Read `rules.json` for every application known to the catalog.
pub fn discover(root: &Path, catalog: &EntityCatalog) -> anyhow::Result<Vec<RuleSource>> {
    let mut sources = Vec::new();

    for application in catalog.applications() {
        let path = root.join(&application).join(RULES_FILE);
        if !path.is_file() {
            tracing::debug!(application = %application, "no rules source");
            continue;
        }

        let raw = fs::read_to_string(&path).with_context(|| format!("failed to read {}", path.display()))?;
        let file: RulesFile =
            serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))?;

        sources.push(RuleSource {
            application,
            path,
            declarations: file.rules,
        });
    }

    Ok(sources)
}

/// Register every declaration. Shape errors abort the sync.
pub fn sync(sources: &[RuleSource], registry: &RuleRegistry, catalog: &EntityCatalog) -> anyhow::Result<SyncReport> {
    let mut report = SyncReport::default();

    for source in sources {
        tracing::info!(application = %source.application, "syncing rules");

        for decl in &source.declarations {
            let Some(descriptor) = catalog.descriptor_in(&source.application, &decl.entity_type) else {
                tracing::warn!(
                    application = %source.application,
                    codename = %decl.codename,
                    entity_type = %decl.entity_type,
                    "rule will not be synced: entity type not found for application"
                );
                report.skipped.push(decl.codename.clone());
                continue;
            };

            let registration = registry
                .register(descriptor.as_ref(), decl.to_spec())
                .with_context(|| format!("invalid rule {} in {}", decl.codename, source.path.display()))?;

            if registration.unchanged {
                report.unchanged += 1;
                continue;
            }
            if registration.overwrote() {
                report.overwritten += 1;
            }
            report.registered.push(registration.rule);
        }
    }

    Ok(report)
}

/// Discover and sync in one step.
pub fn sync_dir(root: &Path, registry: &RuleRegistry, catalog: &EntityCatalog) -> anyhow::Result<SyncReport> {
    let sources = discover(root, catalog)?;
    sync(&sources, registry, catalog)
}

/// Defer registration of every declaration until first use.
pub fn declare_lazy(sources: &[RuleSource], registry: &RuleRegistry, catalog: &EntityCatalog) -> usize {
    let mut declared = 0;
    for source in sources {
        for decl in &source.declarations {
            if let Some(descriptor) = catalog.descriptor_in(&source.application, &decl.entity_type) {
                registry.declare_lazy(descriptor, decl.to_spec());
                declared += 1;
            }
        }
    }
    declared
}
