use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::SqlitePool;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::db::row_parsers;
use crate::rules::{Entity, EntityLoader, EntityShape, Member};

pub const ENTITY_TYPE: &str = "parcel";
pub const APPLICATION: &str = "shipping";

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Parcel {
    pub id: Uuid,
    pub supplier_id: Uuid,
    pub name: String,
    pub disposable: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct DbParcel {
    pub id: Uuid,
    pub supplier_id: Uuid,
    pub name: String,
    pub disposable: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DbParcel> for Parcel {
    fn from(value: DbParcel) -> Self {
        Parcel {
            id: value.id,
            supplier_id: value.supplier_id,
            name: value.name,
            disposable: value.disposable,
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}

impl Parcel {
    /// Members rules may name on a parcel.
    pub fn shape() -> EntityShape {
        EntityShape::new(ENTITY_TYPE)
            .with_field("supplier_id")
            .with_field("name")
            .with_field("disposable")
            .with_field("created_at")
            .with_field("updated_at")
            .with_method("can_ship", 1)
            .with_method("can_trash", 0)
    }
}

impl Entity for Parcel {
    fn type_name(&self) -> &str {
        ENTITY_TYPE
    }

    fn resolve(&self, name: &str) -> Option<Member<'_>> {
        let member = match name {
            "id" => Member::value(self.id.to_string()),
            "supplier_id" => Member::value(self.supplier_id.to_string()),
            "name" => Member::value(self.name.clone()),
            "disposable" => Member::value(self.disposable),
            "created_at" => Member::value(self.created_at.to_rfc3339()),
            "updated_at" => Member::value(self.updated_at.to_rfc3339()),
            // only the supplier may ship
            "can_ship" => Member::method1(move |principal| Ok(Value::Bool(principal.user_id == self.supplier_id))),
            "can_trash" => Member::method0(move || Ok(Value::Bool(self.disposable))),
            _ => return None,
        };
        Some(member)
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ParcelCreateRequest {
    #[schema(example = "Spare parts")]
    pub name: String,
    #[serde(default)]
    pub disposable: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ParcelActionResponse {
    pub parcel_id: Uuid,
    pub action: String,
}

pub async fn fetch_parcel(pool: &SqlitePool, parcel_id: Uuid) -> anyhow::Result<Option<Parcel>> {
    let row = sqlx::query(
        "SELECT id, supplier_id, name, disposable, created_at, updated_at FROM parcels WHERE id = ?",
    )
    .bind(parcel_id.to_string())
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => Ok(Some(row_parsers::db_parcel_from_row(&row)?.into())),
        None => Ok(None),
    }
}

/// Loads parcels for guarded routes. Identifiers that are not uuids match nothing.
#[derive(Debug, Default)]
pub struct ParcelLoader;

impl ParcelLoader {
    pub fn shared() -> Arc<dyn EntityLoader> {
        Arc::new(Self)
    }
}

#[async_trait]
impl EntityLoader for ParcelLoader {
    async fn load(&self, pool: &SqlitePool, pk: &str) -> anyhow::Result<Option<Box<dyn Entity + Send + Sync>>> {
        let Ok(parcel_id) = Uuid::parse_str(pk) else {
            return Ok(None);
        };

        Ok(fetch_parcel(pool, parcel_id)
            .await?
            .map(|parcel| Box::new(parcel) as Box<dyn Entity + Send + Sync>))
    }
}
