use std::collections::BTreeMap;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use serde_json::{json, Map, Value};

use crate::auth::require_user_id;
use crate::error::{AppError, AppResult};
use crate::membership::assert_club_member;
use crate::repository::table_service::list_all_rows;
use crate::schemas::{FeeSummaryQuery, FinancialStatementQuery};
use crate::services::fee_status::decorate_fee_rows;
use crate::services::financial_statement::aggregate_statement;
use crate::services::periods::parse_reference_month;
use crate::state::AppState;

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route(
            "/reports/financial-statement",
            axum::routing::get(financial_statement),
        )
        .route("/reports/fee-summary", axum::routing::get(fee_summary))
}

async fn financial_statement(
    State(state): State<AppState>,
    Query(query): Query<FinancialStatementQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    assert_club_member(&state, &user_id, &query.club_id).await?;
    let pool = db_pool(&state)?;

    if let Some(month) = query.month {
        if !(1..=12).contains(&month) {
            return Err(AppError::BadRequest(format!(
                "Invalid month {month}, expected 1-12."
            )));
        }
    }

    // The whole year window is fetched, paging until exhaustion; the
    // month filter runs in the aggregator so the same rows serve month
    // and whole-year views.
    let mut filters = Map::new();
    filters.insert("club_id".to_string(), Value::String(query.club_id.clone()));
    filters.insert(
        "date__gte".to_string(),
        Value::String(format!("{:04}-01-01", query.year)),
    );
    filters.insert(
        "date__lte".to_string(),
        Value::String(format!("{:04}-12-31", query.year)),
    );

    let transactions = list_all_rows(pool, "transactions", Some(&filters), "date", true).await?;
    let statement = aggregate_statement(&transactions, query.year, query.month);

    Ok(Json(json!({
        "club_id": query.club_id,
        "statement": statement,
    })))
}

async fn fee_summary(
    State(state): State<AppState>,
    Query(query): Query<FeeSummaryQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    assert_club_member(&state, &user_id, &query.club_id).await?;
    let pool = db_pool(&state)?;

    let reference_month = parse_reference_month(&query.reference_month)?;

    let mut filters = Map::new();
    filters.insert("club_id".to_string(), Value::String(query.club_id.clone()));
    filters.insert(
        "reference_month".to_string(),
        Value::String(reference_month.format("%Y-%m-%d").to_string()),
    );

    let mut fees = list_all_rows(pool, "monthly_fees", Some(&filters), "due_date", true).await?;
    decorate_fee_rows(&mut fees, Utc::now().date_naive());

    let mut counts: BTreeMap<String, u64> = BTreeMap::new();
    let mut expected_amount = 0.0;
    let mut collected_amount = 0.0;
    for fee in &fees {
        let display = value_str(fee, "display_status");
        *counts.entry(display.clone()).or_insert(0) += 1;

        let amount = fee
            .as_object()
            .and_then(|object| object.get("amount"))
            .and_then(Value::as_f64)
            .unwrap_or(0.0);
        if display != "cancelled" {
            expected_amount += amount;
        }
        if display == "paid" || display == "paid_late" {
            collected_amount += amount;
        }
    }

    Ok(Json(json!({
        "club_id": query.club_id,
        "reference_month": reference_month.format("%Y-%m-%d").to_string(),
        "counts": counts,
        "expected_amount": round2(expected_amount),
        "collected_amount": round2(collected_amount),
    })))
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
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
