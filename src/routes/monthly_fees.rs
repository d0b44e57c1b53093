use std::collections::HashMap;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use serde_json::{json, Map, Value};

use crate::auth::require_user_id;
use crate::error::{AppError, AppResult};
use crate::membership::{assert_club_member, assert_club_role};
use crate::repository::table_service::list_rows;
use crate::schemas::{
    clamp_limit_in_range, validate_input, FeePath, GenerateFeesInput, MonthlyFeesQuery,
    RecordFeePaymentInput,
};
use crate::services::audit::write_audit_log;
use crate::services::fee_generation::generate_monthly_fees;
use crate::services::fee_status::decorate_fee_rows;
use crate::services::payments::{cancel_fee, delete_fee, record_fee_payment};
use crate::services::periods::parse_reference_month;
use crate::state::AppState;

const FEE_EDIT_ROLES: &[&str] = &["admin", "treasurer"];

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/monthly-fees", axum::routing::get(list_monthly_fees))
        .route(
            "/monthly-fees/generate",
            axum::routing::post(generate_fees),
        )
        .route(
            "/monthly-fees/{fee_id}/mark-paid",
            axum::routing::post(mark_fee_paid),
        )
        .route(
            "/monthly-fees/{fee_id}/cancel",
            axum::routing::post(cancel_monthly_fee),
        )
        .route(
            "/monthly-fees/{fee_id}",
            axum::routing::delete(delete_monthly_fee),
        )
}

async fn list_monthly_fees(
    State(state): State<AppState>,
    Query(query): Query<MonthlyFeesQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    assert_club_member(&state, &user_id, &query.club_id).await?;
    let pool = db_pool(&state)?;

    let mut filters = Map::new();
    filters.insert("club_id".to_string(), Value::String(query.club_id.clone()));
    if let Some(status) = non_empty_opt(query.status.as_deref()) {
        filters.insert("status".to_string(), Value::String(status));
    }
    if let Some(member_id) = non_empty_opt(query.member_id.as_deref()) {
        filters.insert("member_id".to_string(), Value::String(member_id));
    }
    if let Some(raw_month) = non_empty_opt(query.reference_month.as_deref()) {
        let reference_month = parse_reference_month(&raw_month)?;
        filters.insert(
            "reference_month".to_string(),
            Value::String(reference_month.format("%Y-%m-%d").to_string()),
        );
    }

    let mut rows = list_rows(
        pool,
        "monthly_fees",
        Some(&filters),
        clamp_limit_in_range(query.limit, 1, 2000),
        0,
        "due_date",
        false,
    )
    .await?;

    decorate_fee_rows(&mut rows, Utc::now().date_naive());
    let enriched = enrich_fee_rows(pool, rows).await?;
    Ok(Json(json!({ "data": enriched })))
}

async fn generate_fees(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<GenerateFeesInput>,
) -> AppResult<Json<Value>> {
    validate_input(&payload)?;
    let user_id = require_user_id(&state, &headers).await?;
    assert_club_role(&state, &user_id, &payload.club_id, FEE_EDIT_ROLES).await?;
    let pool = db_pool(&state)?;

    let reference_month = parse_reference_month(&payload.reference_month)?;
    let summary = generate_monthly_fees(
        pool,
        &payload.club_id,
        reference_month,
        payload.member_ids.as_deref(),
        state.config.fee_insert_chunk_size,
    )
    .await
    .map_err(AppError::from)?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&payload.club_id),
        Some(&user_id),
        "generate",
        "monthly_fees",
        None,
        None,
        serde_json::to_value(&summary).ok(),
    )
    .await;

    Ok(Json(serde_json::to_value(&summary).unwrap_or_default()))
}

async fn mark_fee_paid(
    State(state): State<AppState>,
    Path(path): Path<FeePath>,
    headers: HeaderMap,
    Json(payload): Json<RecordFeePaymentInput>,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let fee = crate::repository::table_service::get_row(pool, "monthly_fees", &path.fee_id, "id")
        .await?;
    let club_id = value_str(&fee, "club_id");
    assert_club_role(&state, &user_id, &club_id, FEE_EDIT_ROLES).await?;

    let updated = record_fee_payment(pool, &path.fee_id, &payload).await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&club_id),
        Some(&user_id),
        "status_transition",
        "monthly_fees",
        Some(&path.fee_id),
        Some(fee),
        Some(updated.clone()),
    )
    .await;

    let mut rows = vec![updated];
    decorate_fee_rows(&mut rows, Utc::now().date_naive());
    let mut enriched = enrich_fee_rows(pool, rows).await?;
    Ok(Json(
        enriched.pop().unwrap_or_else(|| Value::Object(Map::new())),
    ))
}

async fn cancel_monthly_fee(
    State(state): State<AppState>,
    Path(path): Path<FeePath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let fee = crate::repository::table_service::get_row(pool, "monthly_fees", &path.fee_id, "id")
        .await?;
    let club_id = value_str(&fee, "club_id");
    assert_club_role(&state, &user_id, &club_id, FEE_EDIT_ROLES).await?;

    let updated = cancel_fee(pool, &path.fee_id).await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&club_id),
        Some(&user_id),
        "status_transition",
        "monthly_fees",
        Some(&path.fee_id),
        Some(fee),
        Some(updated.clone()),
    )
    .await;

    Ok(Json(updated))
}

async fn delete_monthly_fee(
    State(state): State<AppState>,
    Path(path): Path<FeePath>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    let pool = db_pool(&state)?;

    let fee = crate::repository::table_service::get_row(pool, "monthly_fees", &path.fee_id, "id")
        .await?;
    let club_id = value_str(&fee, "club_id");
    assert_club_role(&state, &user_id, &club_id, FEE_EDIT_ROLES).await?;

    let deleted = delete_fee(pool, &path.fee_id).await?;

    write_audit_log(
        state.db_pool.as_ref(),
        Some(&club_id),
        Some(&user_id),
        "delete",
        "monthly_fees",
        Some(&path.fee_id),
        Some(deleted.clone()),
        None,
    )
    .await;

    Ok(Json(deleted))
}

/// Attach member name/nickname/category to fee rows via one bulk lookup.
async fn enrich_fee_rows(pool: &sqlx::PgPool, rows: Vec<Value>) -> AppResult<Vec<Value>> {
    if rows.is_empty() {
        return Ok(rows);
    }

    let member_ids = rows
        .iter()
        .map(|row| value_str(row, "member_id"))
        .filter(|member_id| !member_id.is_empty())
        .collect::<Vec<_>>();

    let mut member_index: HashMap<String, Value> = HashMap::new();
    if !member_ids.is_empty() {
        let mut filters = Map::new();
        filters.insert(
            "id__in".to_string(),
            Value::Array(member_ids.iter().cloned().map(Value::String).collect()),
        );
        let members = list_rows(
            pool,
            "members",
            Some(&filters),
            std::cmp::max(200, member_ids.len() as i64),
            0,
            "name",
            true,
        )
        .await?;

        for member in members {
            let member_id = value_str(&member, "id");
            if !member_id.is_empty() {
                member_index.insert(member_id, member);
            }
        }
    }

    let mut enriched = Vec::with_capacity(rows.len());
    for mut row in rows {
        if let Some(object) = row.as_object_mut() {
            let member_id = object
                .get("member_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            if let Some(member) = member_index.get(&member_id).and_then(Value::as_object) {
                object.insert(
                    "member_name".to_string(),
                    member.get("name").cloned().unwrap_or(Value::Null),
                );
                object.insert(
                    "member_nickname".to_string(),
                    member.get("nickname").cloned().unwrap_or(Value::Null),
                );
                object.insert(
                    "member_category".to_string(),
                    member.get("category").cloned().unwrap_or(Value::Null),
                );
            }
        }
        enriched.push(row);
    }

    Ok(enriched)
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

fn non_empty_opt(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(ToOwned::to_owned)
}
