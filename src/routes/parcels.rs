use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use uuid::Uuid;

use crate::app::AppState;
use crate::errors::{AppError, AppResult};
use crate::jwt::AuthUser;
use crate::models::parcel::{fetch_parcel, Parcel, ParcelActionResponse, ParcelCreateRequest};

#[utoipa::path(
    post,
    path = "/parcels",
    tag = "Parcels",
    request_body = ParcelCreateRequest,
    security(("bearerAuth" = [])),
    responses(
        (status = 201, description = "Parcel created; the caller is its supplier", body = Parcel),
        (status = 400, description = "Empty name"),
        (status = 401, description = "Missing or invalid token")
    )
)]
pub async fn create_parcel(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<ParcelCreateRequest>,
) -> AppResult<(StatusCode, Json<Parcel>)> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("name must not be empty"));
    }

    let now = Utc::now();
    let parcel = Parcel {
        id: Uuid::new_v4(),
        supplier_id: auth.user_id,
        name: name.to_string(),
        disposable: payload.disposable,
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        "INSERT INTO parcels (id, supplier_id, name, disposable, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(parcel.id.to_string())
    .bind(parcel.supplier_id.to_string())
    .bind(&parcel.name)
    .bind(parcel.disposable)
    .bind(parcel.created_at)
    .bind(parcel.updated_at)
    .execute(&state.pool)
    .await?;

    Ok((StatusCode::CREATED, Json(parcel)))
}

#[utoipa::path(
    get,
    path = "/parcels/{parcel_id}",
    tag = "Parcels",
    params(("parcel_id" = Uuid, Path, description = "Parcel id")),
    responses(
        (status = 200, description = "Parcel", body = Parcel),
        (status = 404, description = "Parcel not found")
    )
)]
pub async fn get_parcel(State(state): State<AppState>, Path(parcel_id): Path<Uuid>) -> AppResult<Json<Parcel>> {
    let parcel = fetch_parcel(&state.pool, parcel_id)
        .await?
        .ok_or_else(|| AppError::not_found("parcel not found"))?;
    Ok(Json(parcel))
}

/// Guarded by `parcel.can_ship`; denied callers get 403.
#[utoipa::path(
    post,
    path = "/parcels/{parcel_id}/ship",
    tag = "Parcels",
    params(("parcel_id" = Uuid, Path, description = "Parcel id")),
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "Parcel shipped", body = ParcelActionResponse),
        (status = 403, description = "Caller is not the supplier"),
        (status = 404, description = "Parcel not found")
    )
)]
pub async fn ship_parcel(Path(parcel_id): Path<Uuid>) -> AppResult<Json<ParcelActionResponse>> {
    tracing::info!(parcel_id = %parcel_id, "parcel shipped");
    Ok(Json(ParcelActionResponse {
        parcel_id,
        action: "shipped".to_string(),
    }))
}

/// Guarded by `parcel.can_trash`; denied callers are redirected to login.
#[utoipa::path(
    post,
    path = "/parcels/{parcel_id}/trash",
    tag = "Parcels",
    params(("parcel_id" = Uuid, Path, description = "Parcel id")),
    responses(
        (status = 200, description = "Parcel removed", body = ParcelActionResponse),
        (status = 303, description = "Not disposable; redirect to login"),
        (status = 404, description = "Parcel not found")
    )
)]
pub async fn trash_parcel(
    State(state): State<AppState>,
    Path(parcel_id): Path<Uuid>,
) -> AppResult<Json<ParcelActionResponse>> {
    sqlx::query("DELETE FROM parcels WHERE id = ?")
        .bind(parcel_id.to_string())
        .execute(&state.pool)
        .await?;

    tracing::info!(parcel_id = %parcel_id, "parcel trashed");
    Ok(Json(ParcelActionResponse {
        parcel_id,
        action: "trashed".to_string(),
    }))
}
