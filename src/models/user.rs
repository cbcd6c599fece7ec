use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::db::row_parsers;
use crate::errors::AppResult;
use crate::rules::Principal;

const USER_COLUMNS: &str =
    "id, name, email, password_hash, provider, provider_id, is_superuser, is_active, created_at, updated_at, deleted_at";

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub provider: String,
    pub provider_id: Option<String>,
    pub is_superuser: bool,
    pub is_active: bool,
    pub roles: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct DbUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub provider: String,
    pub provider_id: Option<String>,
    pub is_superuser: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl DbUser {
    pub fn into_user(self, mut roles: Vec<String>) -> User {
        roles.sort();
        User {
            id: self.id,
            name: self.name,
            email: self.email,
            provider: self.provider,
            provider_id: self.provider_id,
            is_superuser: self.is_superuser,
            is_active: self.is_active,
            roles,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    /// Authorization identity for this account.
    pub fn principal(&self, roles: impl IntoIterator<Item = String>) -> Principal {
        let mut principal = Principal::new(self.id).with_name(self.name.clone()).with_roles(roles);
        principal.is_superuser = self.is_superuser;
        principal.is_active = self.is_active;
        principal
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RegisterRequest {
    #[schema(example = "Ada Lovelace")]
    pub name: String,
    #[schema(example = "ada@example.com")]
    pub email: String,
    #[schema(example = "S3cureP@ssw0rd")]
    pub password: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    #[schema(example = "ada@example.com")]
    pub email: String,
    #[schema(example = "S3cureP@ssw0rd")]
    pub password: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AuthResponse {
    pub token: String,
    pub user: User,
}

pub async fn fetch_user_by_id(pool: &SqlitePool, user_id: Uuid) -> AppResult<Option<DbUser>> {
    let sql = format!("SELECT {} FROM users WHERE id = ? AND deleted_at IS NULL", USER_COLUMNS);
    let row = sqlx::query(&sql).bind(user_id.to_string()).fetch_optional(pool).await?;
    row.as_ref().map(row_parsers::db_user_from_row).transpose()
}

pub async fn fetch_user_by_email(pool: &SqlitePool, email: &str) -> AppResult<Option<DbUser>> {
    let sql = format!("SELECT {} FROM users WHERE email = ? AND deleted_at IS NULL", USER_COLUMNS);
    let row = sqlx::query(&sql).bind(email).fetch_optional(pool).await?;
    row.as_ref().map(row_parsers::db_user_from_row).transpose()
}

pub async fn fetch_roles(pool: &SqlitePool, user_id: Uuid) -> AppResult<Vec<String>> {
    let roles = sqlx::query_scalar::<_, String>("SELECT role FROM user_roles WHERE user_id = ? ORDER BY role")
        .bind(user_id.to_string())
        .fetch_all(pool)
        .await?;
    Ok(roles)
}
