use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::{parcel::DbParcel, user::DbUser};

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, AppError> {
    let s = s.trim();

    // RFC3339 (e.g. 2025-11-19T12:34:56Z), as written by chrono binds
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    // SQLite default timestamp format, optional fractional seconds
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(Utc.from_utc_datetime(&naive));
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Ok(Utc.from_utc_datetime(&naive));
    }

    if let Ok(naive_date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let ndt = naive_date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| AppError::internal("invalid datetime: date out of range".to_string()))?;
        return Ok(Utc.from_utc_datetime(&ndt));
    }

    Err(AppError::internal(format!("invalid datetime: {}", s)))
}

fn parse_uuid(column: &str, s: &str) -> Result<Uuid, AppError> {
    Uuid::parse_str(s).map_err(|e| AppError::internal(format!("invalid uuid in {}: {}", column, e)))
}

pub fn db_user_from_row(row: &SqliteRow) -> Result<DbUser, AppError> {
    let id_s: String = row.try_get("id").map_err(|e| AppError::internal(format!("missing id: {}", e)))?;
    let name: String = row.try_get("name").map_err(|e| AppError::internal(format!("missing name: {}", e)))?;
    let email: String = row.try_get("email").map_err(|e| AppError::internal(format!("missing email: {}", e)))?;
    let password_hash: String = row.try_get("password_hash").map_err(|e| AppError::internal(format!("missing password_hash: {}", e)))?;
    let provider: String = row.try_get("provider").map_err(|e| AppError::internal(format!("missing provider: {}", e)))?;
    let provider_id: Option<String> = row.try_get("provider_id").map_err(|e| AppError::internal(format!("missing provider_id: {}", e)))?;
    let is_superuser: bool = row.try_get("is_superuser").map_err(|e| AppError::internal(format!("missing is_superuser: {}", e)))?;
    let is_active: bool = row.try_get("is_active").map_err(|e| AppError::internal(format!("missing is_active: {}", e)))?;
    let created_at_s: String = row.try_get("created_at").map_err(|e| AppError::internal(format!("missing created_at: {}", e)))?;
    let updated_at_s: String = row.try_get("updated_at").map_err(|e| AppError::internal(format!("missing updated_at: {}", e)))?;
    let deleted_at_s: Option<String> = row.try_get("deleted_at").map_err(|e| AppError::internal(format!("missing deleted_at: {}", e)))?;

    let id = parse_uuid("id", &id_s)?;
    let created_at = parse_datetime(&created_at_s)?;
    let updated_at = parse_datetime(&updated_at_s)?;
    let deleted_at = if let Some(s) = deleted_at_s { Some(parse_datetime(&s)?) } else { None };

    Ok(DbUser {
        id,
        name,
        email,
        password_hash,
        provider,
        provider_id,
        is_superuser,
        is_active,
        created_at,
        updated_at,
        deleted_at,
    })
}

pub fn db_parcel_from_row(row: &SqliteRow) -> Result<DbParcel, AppError> {
    let id_s: String = row.try_get("id").map_err(|e| AppError::internal(format!("missing id: {}", e)))?;
    let supplier_id_s: String = row.try_get("supplier_id").map_err(|e| AppError::internal(format!("missing supplier_id: {}", e)))?;
    let name: String = row.try_get("name").map_err(|e| AppError::internal(format!("missing name: {}", e)))?;
    let disposable: bool = row.try_get("disposable").map_err(|e| AppError::internal(format!("missing disposable: {}", e)))?;
    let created_at_s: String = row.try_get("created_at").map_err(|e| AppError::internal(format!("missing created_at: {}", e)))?;
    let updated_at_s: String = row.try_get("updated_at").map_err(|e| AppError::internal(format!("missing updated_at: {}", e)))?;

    Ok(DbParcel {
        id: parse_uuid("id", &id_s)?,
        supplier_id: parse_uuid("supplier_id", &supplier_id_s)?,
        name,
        disposable,
        created_at: parse_datetime(&created_at_s)?,
        updated_at: parse_datetime(&updated_at_s)?,
    })
}
