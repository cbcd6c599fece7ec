use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::errors::{AppError, AppResult};

pub mod loggable;
pub use loggable::{Loggable, Severity};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent<T> {
    pub id: Uuid,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
    pub actor_id: Option<Uuid>,
    pub subject_scope: String,
    pub subject_key: String,
    pub severity: Severity,
    pub payload: T,
}

impl<T> DomainEvent<T> {
    pub fn new(
        name: impl Into<String>,
        actor_id: Option<Uuid>,
        subject_scope: impl Into<String>,
        subject_key: impl Into<String>,
        severity: Severity,
        payload: T,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            occurred_at: Utc::now(),
            actor_id,
            subject_scope: subject_scope.into(),
            subject_key: subject_key.into(),
            severity,
            payload,
        }
    }
}

pub type EventBus = broadcast::Sender<Value>;

pub fn init_event_bus() -> (EventBus, broadcast::Receiver<Value>) {
    broadcast::channel(1024)
}

/// Build the `<entity_type>.<action>` event for `entity`.
pub fn build_event<T: Loggable>(
    action: &str,
    actor_id: Option<Uuid>,
    entity: &T,
) -> Result<DomainEvent<Value>, serde_json::Error> {
    Ok(DomainEvent::new(
        format!("{}.{}", T::entity_type(), action),
        actor_id,
        entity.subject_scope(),
        entity.subject_key(),
        entity.severity_for_action(action),
        serde_json::to_value(entity)?,
    ))
}

/// Publish an event for `entity` on the bus.
///
/// Fire and forget: a bus without listeners drops the event.
pub fn log_activity<T: Loggable>(event_bus: &EventBus, action: &str, actor_id: Option<Uuid>, entity: &T) {
    let sent = build_event(action, actor_id, entity)
        .and_then(|event| serde_json::to_value(&event))
        .map(|value| event_bus.send(value).is_ok());

    match sent {
        Ok(true) => {}
        Ok(false) => tracing::debug!(action = %action, "no audit listener"),
        Err(err) => tracing::error!(error = %err, "failed to serialize audit event"),
    }
}

/// Append one event to `rule_audit`, chained to the previous entry.
///
/// `hash = sha256(prev_hash || payload)`; the first entry has no `prev_hash`.
pub async fn append_audit(pool: &SqlitePool, event: &DomainEvent<Value>) -> AppResult<String> {
    let payload = serde_json::to_string(&event.payload)
        .map_err(|e| AppError::internal(format!("failed to serialize payload: {}", e)))?;

    let mut tx = pool.begin().await?;

    let prev_hash: Option<String> = sqlx::query_scalar("SELECT hash FROM rule_audit ORDER BY rowid DESC LIMIT 1")
        .fetch_optional(&mut *tx)
        .await?;

    let hash = chain_hash(prev_hash.as_deref(), &payload);

    sqlx::query(
        "INSERT INTO rule_audit (id, event_name, occurred_at, actor_id, entity_type, codename, severity, payload, prev_hash, hash) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(event.id.to_string())
    .bind(&event.name)
    .bind(event.occurred_at)
    .bind(event.actor_id.map(|id| id.to_string()))
    .bind(&event.subject_scope)
    .bind(&event.subject_key)
    .bind(event.severity.as_str())
    .bind(&payload)
    .bind(&prev_hash)
    .bind(&hash)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(hash)
}

/// Recompute the chain; `false` if any entry was altered or reordered.
pub async fn verify_audit_chain(pool: &SqlitePool) -> AppResult<bool> {
    let rows = sqlx::query("SELECT payload, prev_hash, hash FROM rule_audit ORDER BY rowid")
        .fetch_all(pool)
        .await?;

    let mut expected_prev: Option<String> = None;
    for row in rows {
        let payload: String = row.try_get("payload")?;
        let prev_hash: Option<String> = row.try_get("prev_hash")?;
        let hash: String = row.try_get("hash")?;

        if prev_hash != expected_prev || chain_hash(prev_hash.as_deref(), &payload) != hash {
            return Ok(false);
        }
        expected_prev = Some(hash);
    }

    Ok(true)
}

fn chain_hash(prev_hash: Option<&str>, payload: &str) -> String {
    let mut hasher = Sha256::new();
    if let Some(prev) = prev_hash {
        hasher.update(prev.as_bytes());
    }
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}

pub async fn start_audit_listener(mut rx: broadcast::Receiver<Value>, pool: SqlitePool) {
    tracing::info!("audit listener started");
    loop {
        let raw = match rx.recv().await {
            Ok(raw) => raw,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "audit listener lagged, events dropped");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let event: DomainEvent<Value> = match serde_json::from_value(raw) {
            Ok(event) => event,
            Err(err) => {
                tracing::error!(error = %err, "malformed audit event");
                continue;
            }
        };

        if let Err(err) = append_audit(&pool, &event).await {
            tracing::error!(event = %event.name, error = %err, "failed to append audit entry");
        }
    }
    tracing::info!("audit listener stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::{EntityShape, RuleSpec};

    #[test]
    fn chain_hash_depends_on_previous_entry() {
        let first = chain_hash(None, "{}");
        let second = chain_hash(Some(&first), "{}");
        assert_eq!(first.len(), 64);
        assert_ne!(first, second);
        assert_eq!(second, chain_hash(Some(&first), "{}"));
    }

    #[test]
    fn severity_follows_the_action() -> anyhow::Result<()> {
        #[derive(Serialize)]
        struct Note;

        impl Loggable for Note {
            fn entity_type() -> &'static str {
                "note"
            }
            fn subject_scope(&self) -> &str {
                "notes"
            }
            fn subject_key(&self) -> &str {
                "n1"
            }
        }

        assert_eq!(Note.severity_for_action("deleted"), Severity::Critical);
        assert_eq!(Note.severity_for_action("registered"), Severity::Important);

        let parcel = EntityShape::new("parcel").with_method("can_ship", 1);
        let rule = RuleSpec::new("can_ship").validate(&parcel)?;
        assert_eq!(rule.severity_for_action("deleted"), Severity::Critical);
        assert_eq!(rule.severity_for_action("overwritten"), Severity::Important);
        assert_eq!(rule.severity_for_action("synced"), Severity::Noise);
        Ok(())
    }
}
