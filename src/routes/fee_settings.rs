use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::{json, Map, Value};

use crate::auth::require_user_id;
use crate::error::{AppError, AppResult};
use crate::membership::{assert_club_member, assert_club_role};
use crate::repository::table_service::{create_row, delete_row, get_row, list_rows, update_row};
use crate::schemas::{
    clamp_limit_in_range, remove_nulls, serialize_to_map, validate_input, CreateFeeSettingInput,
    FeeSettingPath, FeeSettingsQuery, UpdateFeeSettingInput,
};
use crate::services::audit::write_audit_log;
use crate::state::AppState;

const FEE_EDIT_ROLES: &[&str] = &["admin", "treasurer"];

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/fee-settings",
            axum::routing::get(list_fee_settings).post(create_fee_setting),
        )
        .route(
            "/fee-settings/{setting_id}",
            axum::routing::patch(update_fee_setting).delete(delete_fee_setting),
        )
}

async fn list_fee_settings(
    State(state): State<AppState>,
    Query(query): Query<FeeSettingsQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    assert_club_member(&state, &user_id, &query.club_id).await?;
    let pool = db_pool(&state)?;

    let mut filters = Map::new();
    filters.insert("club_id".to_string(), Value::String(query.club_id.clone()));
    if let Some(active) = query.active {
        filters.insert("active".to_string(), Value::Bool(active));
    }

    let rows = list_rows(
        pool,
        "monthly_fee_settings",
        Some(&filters),
        clamp_limit_in_range(query.limit, 1, 500),
        0,
        "category",
        true,
    )
    .await?;

    Ok(Json(json!({ "data": rows })))
}

async fn create_fee_setting(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateFeeSettingInput>,
) -> AppResult<impl IntoResponse> {
    validate_input(&payload)?;
    let user_id = require_user_id(&state, &headers).await?;
    assert_club_role(&state, &user_id, &payload.club_id, FEE_EDIT_ROLES).await?;
    let pool = db_pool(&state)?;

    let record = remove_nulls(serialize_to_map(&payload));
    let created = create_row(pool, "monthly_fee_settings", &record).await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&payload.club_id),
        Some(&user_id),
        "create",
        "monthly_fee_settings",
        created.get("id").and_then(Value::as_str),
        None,
        Some(created.clone()),
    )
    .await;

    Ok((axum::http::StatusCode::CREATED, Json(created)))
}

async fn update_fee_setting(
    State(state): State<AppState>,
    Path(path): Path<FeeSettingPath>,
    headers: HeaderMap,
    Json(payload): Json<UpdateFeeSettingInput>,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let setting = get_row(pool, "monthly_fee_settings", &path.setting_id, "id").await?;
    let club_id = value_str(&setting, "club_id");
    assert_club_role(&state, &user_id, &club_id, FEE_EDIT_ROLES).await?;

    let patch = remove_nulls(serialize_to_map(&payload));
    if patch.is_empty() {
        return Err(AppError::BadRequest("No fields to update.".to_string()));
    }
    let updated = update_row(pool, "monthly_fee_settings", &path.setting_id, &patch, "id").await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&club_id),
        Some(&user_id),
        "update",
        "monthly_fee_settings",
        Some(&path.setting_id),
        Some(setting),
        Some(updated.clone()),
    )
    .await;

    Ok(Json(updated))
}

async fn delete_fee_setting(
    State(state): State<AppState>,
    Path(path): Path<FeeSettingPath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let setting = get_row(pool, "monthly_fee_settings", &path.setting_id, "id").await?;
    let club_id = value_str(&setting, "club_id");
    assert_club_role(&state, &user_id, &club_id, FEE_EDIT_ROLES).await?;

    let deleted = delete_row(pool, "monthly_fee_settings", &path.setting_id, "id").await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&club_id),
        Some(&user_id),
        "delete",
        "monthly_fee_settings",
        Some(&path.setting_id),
        Some(deleted.clone()),
        None,
    )
    .await;

    Ok(Json(deleted))
}

fn db_pool(state: &AppState) -> AppResult<&sqlx::PgPool> {
    state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency("Database is not configured. Set DATABASE_URL.".to_string())
    })
}

fn value_str(row: &Value, key: &str) -> String {
    row.as_object()
        .and_then(|object| object.get(key))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_default()
}
