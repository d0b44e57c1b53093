use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Map, Value};

use crate::auth::require_user_id;
use crate::error::{AppError, AppResult};
use crate::membership::assert_club_member;
use crate::repository::table_service::list_rows;
use crate::schemas::{
    clamp_limit_in_range, MemberPath, MemberRankingQuery, MemberScoreQuery, MembersQuery,
};
use crate::services::member_score::{compute_club_ranking, compute_member_score, default_score_year};
use crate::state::AppState;

pub fn router() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/members", axum::routing::get(list_members))
        .route("/members/ranking", axum::routing::get(member_ranking))
        .route(
            "/members/{member_id}/score",
            axum::routing::get(member_score),
        )
}

async fn list_members(
    State(state): State<AppState>,
    Query(query): Query<MembersQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    assert_club_member(&state, &user_id, &query.club_id).await?;
    let pool = db_pool(&state)?;

    let mut filters = Map::new();
    filters.insert("club_id".to_string(), Value::String(query.club_id.clone()));
    if !query.status.trim().is_empty() {
        filters.insert("status".to_string(), Value::String(query.status.clone()));
    }
    if let Some(category) = query
        .category
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    {
        filters.insert("category".to_string(), Value::String(category.to_string()));
    }

    let rows = list_rows(
        pool,
        "members",
        Some(&filters),
        clamp_limit_in_range(query.limit, 1, 2000),
        0,
        "name",
        true,
    )
    .await?;

    Ok(Json(json!({ "data": rows })))
}

async fn member_score(
    State(state): State<AppState>,
    Path(path): Path<MemberPath>,
    Query(query): Query<MemberScoreQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    assert_club_member(&state, &user_id, &query.club_id).await?;
    let pool = db_pool(&state)?;

    let year = query.year.unwrap_or_else(default_score_year);
    let score = compute_member_score(pool, &query.club_id, &path.member_id, year).await?;

    Ok(Json(json!({
        "year": year,
        "score": score,
    })))
}

async fn member_ranking(
    State(state): State<AppState>,
    Query(query): Query<MemberRankingQuery>,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    let user_id = require_user_id(&state, &headers).await?;
    assert_club_member(&state, &user_id, &query.club_id).await?;
    let pool = db_pool(&state)?;

    let year = query.year.unwrap_or_else(default_score_year);
    let limit = clamp_limit_in_range(query.limit, 1, 200) as usize;
    let ranking = compute_club_ranking(pool, &query.club_id, year, limit).await?;

    Ok(Json(json!({
        "year": year,
        "data": ranking,
    })))
}

fn db_pool(state: &AppState) -> AppResult<&sqlx::PgPool> {
    state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency("Database is not configured. Set DATABASE_URL.".to_string())
    })
}
