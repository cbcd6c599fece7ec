use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::entity::EntityCatalog;
use super::registry::RuleRegistry;
use super::rule::{Rule, RuleSpec};
use crate::errors::{AppError, AppResult};

/// A persisted rule row, not yet revalidated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRule {
    pub entity_type: String,
    pub spec: RuleSpec,
}

/// Durable rule definitions in the `rule_permissions` table.
#[derive(Debug, Clone)]
pub struct RuleStore {
    pool: SqlitePool,
}

impl RuleStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or replace the row for the rule's key.
    pub async fn save(&self, rule: &Rule) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO rule_permissions (entity_type, codename, field_name, view_param_pk, description, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT(entity_type, codename) DO UPDATE SET \
               field_name = excluded.field_name, \
               view_param_pk = excluded.view_param_pk, \
               description = excluded.description, \
               updated_at = excluded.updated_at",
        )
        .bind(rule.entity_type())
        .bind(rule.codename())
        .bind(rule.field_name())
        .bind(rule.view_param_pk())
        .bind(rule.description())
        .bind(chrono::Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn delete(&self, entity_type: &str, codename: &str) -> AppResult<bool> {
        let result = sqlx::query("DELETE FROM rule_permissions WHERE entity_type = ? AND codename = ?")
            .bind(entity_type)
            .bind(codename)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn load_all(&self) -> AppResult<Vec<StoredRule>> {
        let rows = sqlx::query(
            "SELECT entity_type, codename, field_name, view_param_pk, description FROM rule_permissions ORDER BY entity_type, codename",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(stored_rule_from_row).collect()
    }

    /// Re-register every persisted rule through validation.
    ///
    /// Rows for unknown entity types are skipped with a warning; rows that no
    /// longer match their entity's shape fail the whole load.
    pub async fn hydrate(&self, registry: &RuleRegistry, catalog: &EntityCatalog) -> AppResult<usize> {
        let mut loaded = 0;

        for stored in self.load_all().await? {
            let Some(descriptor) = catalog.descriptor(&stored.entity_type) else {
                tracing::warn!(
                    entity_type = %stored.entity_type,
                    codename = %stored.spec.codename,
                    "persisted rule references an unknown entity type"
                );
                continue;
            };
            registry.register(descriptor.as_ref(), stored.spec)?;
            loaded += 1;
        }

        tracing::info!(rules = loaded, "rules loaded from database");
        Ok(loaded)
    }
}

fn stored_rule_from_row(row: &SqliteRow) -> AppResult<StoredRule> {
    let get = |column: &str| -> AppResult<String> {
        row.try_get(column)
            .map_err(|e| AppError::internal(format!("missing {}: {}", column, e)))
    };

    Ok(StoredRule {
        entity_type: get("entity_type")?,
        spec: RuleSpec {
            codename: get("codename")?,
            field_name: Some(get("field_name")?),
            view_param_pk: Some(get("view_param_pk")?),
            description: row
                .try_get::<Option<String>, _>("description")
                .map_err(|e| AppError::internal(format!("missing description: {}", e)))?,
        },
    })
}
