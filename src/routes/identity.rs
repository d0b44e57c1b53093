use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde_json::{json, Value};

use crate::auth::resolve_session;
use crate::error::AppResult;
use crate::membership::list_user_club_ids;
use crate::state::AppState;

pub async fn me(State(state): State<AppState>, headers: HeaderMap) -> AppResult<Json<Value>> {
    let session = resolve_session(&state, &headers).await?;
    let club_ids = list_user_club_ids(&state, &session.user_id).await?;

    Ok(Json(json!({
        "user_id": session.user_id,
        "email": session.email,
        "club_ids": club_ids,
    })))
}
