use serde_json::Value;
use sqlx::{PgPool, Row};

use crate::error::{AppError, AppResult};
use crate::state::AppState;

fn db_pool(state: &AppState) -> AppResult<&PgPool> {
    state.db_pool.as_ref().ok_or_else(|| {
        AppError::Dependency("Database is not configured. Set DATABASE_URL.".to_string())
    })
}

/// Look up a user's membership row for a club, through the TTL cache.
pub async fn get_club_membership(
    state: &AppState,
    user_id: &str,
    club_id: &str,
) -> AppResult<Option<Value>> {
    let cache_key = format!("{club_id}:{user_id}");
    if let Some(cached) = state.membership_cache.get(&cache_key).await {
        return Ok(cached);
    }

    let pool = db_pool(state)?;
    let row = sqlx::query(
        "SELECT row_to_json(t) AS row
         FROM club_members t
         WHERE club_id = $1::uuid AND user_id = $2::uuid
         LIMIT 1",
    )
    .bind(club_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await
    .map_err(|error| {
        tracing::error!(db_error = %error, "Membership lookup failed");
        AppError::Dependency("Database operation failed.".to_string())
    })?;

    let membership = row.and_then(|value| value.try_get::<Option<Value>, _>("row").ok().flatten());
    state
        .membership_cache
        .insert(cache_key, membership.clone())
        .await;
    Ok(membership)
}

pub async fn assert_club_member(
    state: &AppState,
    user_id: &str,
    club_id: &str,
) -> AppResult<Value> {
    get_club_membership(state, user_id, club_id)
        .await?
        .ok_or_else(|| AppError::Forbidden("Forbidden: not a member of this club.".to_string()))
}

pub async fn assert_club_role(
    state: &AppState,
    user_id: &str,
    club_id: &str,
    allowed_roles: &[&str],
) -> AppResult<Value> {
    let membership = assert_club_member(state, user_id, club_id).await?;
    let role = membership
        .get("role")
        .and_then(Value::as_str)
        .unwrap_or("unknown");

    if allowed_roles.contains(&role) {
        return Ok(membership);
    }

    Err(AppError::Forbidden(format!(
        "Forbidden: role '{role}' is not allowed for this action."
    )))
}

pub async fn list_user_club_ids(state: &AppState, user_id: &str) -> AppResult<Vec<String>> {
    let pool = db_pool(state)?;
    let rows = sqlx::query(
        "SELECT club_id::text AS club_id
         FROM club_members
         WHERE user_id = $1::uuid
         LIMIT 500",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await
    .map_err(|error| {
        tracing::error!(db_error = %error, "Club listing failed");
        AppError::Dependency("Database operation failed.".to_string())
    })?;

    let mut club_ids = Vec::new();
    for row in rows {
        if let Ok(value) = row.try_get::<String, _>("club_id") {
            if !value.is_empty() {
                club_ids.push(value);
            }
        }
    }
    Ok(club_ids)
}
