//! Entity capability interface.
//!
//! Rules never reflect over arbitrary values. An entity type exposes its
//! shape through [`EntityType`] (checked once, at registration) and each
//! instance resolves members by name through [`Entity`] (at evaluation).

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::SqlitePool;

use super::principal::Principal;

/// Shape of an entity type, as seen by the registry.
pub trait EntityType: Send + Sync {
    /// Stable name used as the first half of a rule key.
    fn type_name(&self) -> &str;

    /// Name of the primary identifier field.
    fn primary_key(&self) -> &str;

    /// Whether `name` is a declared, non-callable field.
    fn has_field(&self, name: &str) -> bool;

    /// Arity of the callable member `name`, excluding the receiver.
    fn callable_arity(&self, name: &str) -> Option<usize>;
}

/// A loaded instance a permission is checked against.
pub trait Entity {
    fn type_name(&self) -> &str;

    /// Resolve a member by name. `None` means the instance has no such member.
    fn resolve(&self, name: &str) -> Option<Member<'_>>;
}

pub type Method0<'a> = Box<dyn Fn() -> anyhow::Result<Value> + 'a>;
pub type Method1<'a> = Box<dyn Fn(&Principal) -> anyhow::Result<Value> + 'a>;

/// A resolved member: a plain value, or an invocable taking 0 or 1 arguments.
pub enum Member<'a> {
    Value(Value),
    Method0(Method0<'a>),
    Method1(Method1<'a>),
}

impl<'a> Member<'a> {
    pub fn value(value: impl Into<Value>) -> Self {
        Member::Value(value.into())
    }

    pub fn method0<F>(f: F) -> Self
    where
        F: Fn() -> anyhow::Result<Value> + 'a,
    {
        Member::Method0(Box::new(f))
    }

    pub fn method1<F>(f: F) -> Self
    where
        F: Fn(&Principal) -> anyhow::Result<Value> + 'a,
    {
        Member::Method1(Box::new(f))
    }
}

impl fmt::Debug for Member<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Member::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Member::Method0(_) => f.write_str("Method0(..)"),
            Member::Method1(_) => f.write_str("Method1(..)"),
        }
    }
}

/// Data-driven [`EntityType`] descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityShape {
    name: String,
    primary_key: String,
    fields: BTreeSet<String>,
    methods: BTreeMap<String, usize>,
}

impl EntityShape {
    /// New shape with primary key `id`, declared as a field.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: "id".to_string(),
            fields: BTreeSet::from(["id".to_string()]),
            methods: BTreeMap::new(),
        }
    }

    pub fn with_primary_key(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.fields.remove(&self.primary_key);
        self.fields.insert(name.clone());
        self.primary_key = name;
        self
    }

    pub fn with_field(mut self, name: impl Into<String>) -> Self {
        self.fields.insert(name.into());
        self
    }

    /// Declare a callable member with `arity` arguments besides the receiver.
    pub fn with_method(mut self, name: impl Into<String>, arity: usize) -> Self {
        self.methods.insert(name.into(), arity);
        self
    }

    /// Drop a field or method, simulating schema drift.
    pub fn without(mut self, name: &str) -> Self {
        self.fields.remove(name);
        self.methods.remove(name);
        self
    }
}

impl EntityType for EntityShape {
    fn type_name(&self) -> &str {
        &self.name
    }

    fn primary_key(&self) -> &str {
        &self.primary_key
    }

    fn has_field(&self, name: &str) -> bool {
        self.fields.contains(name)
    }

    fn callable_arity(&self, name: &str) -> Option<usize> {
        self.methods.get(name).copied()
    }
}

/// Loads a target instance by its identifier, for the view guard.
#[async_trait]
pub trait EntityLoader: Send + Sync {
    async fn load(&self, pool: &SqlitePool, pk: &str) -> anyhow::Result<Option<Box<dyn Entity + Send + Sync>>>;
}

#[derive(Clone)]
struct CatalogEntry {
    application: String,
    descriptor: Arc<dyn EntityType>,
    loader: Option<Arc<dyn EntityLoader>>,
}

/// Known entity types, keyed by type name and grouped by application.
#[derive(Clone, Default)]
pub struct EntityCatalog {
    entries: HashMap<String, CatalogEntry>,
}

impl EntityCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(
        mut self,
        application: impl Into<String>,
        descriptor: Arc<dyn EntityType>,
        loader: Option<Arc<dyn EntityLoader>>,
    ) -> Self {
        self.insert(application, descriptor, loader);
        self
    }

    pub fn insert(
        &mut self,
        application: impl Into<String>,
        descriptor: Arc<dyn EntityType>,
        loader: Option<Arc<dyn EntityLoader>>,
    ) {
        let entry = CatalogEntry {
            application: application.into(),
            descriptor,
            loader,
        };
        self.entries.insert(entry.descriptor.type_name().to_string(), entry);
    }

    pub fn descriptor(&self, type_name: &str) -> Option<Arc<dyn EntityType>> {
        self.entries.get(type_name).map(|e| Arc::clone(&e.descriptor))
    }

    /// Descriptor for `type_name`, only if it belongs to `application`.
    /// Type names are matched case-insensitively.
    pub fn descriptor_in(&self, application: &str, type_name: &str) -> Option<Arc<dyn EntityType>> {
        self.entries
            .values()
            .find(|e| e.application == application && e.descriptor.type_name().eq_ignore_ascii_case(type_name))
            .map(|e| Arc::clone(&e.descriptor))
    }

    pub fn loader(&self, type_name: &str) -> Option<Arc<dyn EntityLoader>> {
        self.entries.get(type_name).and_then(|e| e.loader.clone())
    }

    pub fn applications(&self) -> BTreeSet<String> {
        self.entries.values().map(|e| e.application.clone()).collect()
    }
}

impl fmt::Debug for EntityCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityCatalog")
            .field("entity_types", &self.entries.keys().collect::<BTreeSet<_>>())
            .finish()
    }
}
