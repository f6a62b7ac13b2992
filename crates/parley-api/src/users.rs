use std::collections::HashSet;

use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::error;
use uuid::Uuid;

use parley_types::api::{Claims, UserSummary};

use crate::auth::AppState;

/// Every other registered user, with their live presence flag.
pub async fn list_users(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let me = claims.sub.to_string();
    let rows = tokio::task::spawn_blocking(move || db.list_users_except(&me))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let online: HashSet<Uuid> = state
        .dispatcher
        .online_user_ids()
        .await
        .into_iter()
        .collect();

    let users: Vec<UserSummary> = rows
        .into_iter()
        .filter_map(|row| {
            let id: Uuid = row.id.parse().ok()?;
            Some(UserSummary {
                id,
                username: row.username,
                online: online.contains(&id),
            })
        })
        .collect();

    Ok(Json(users))
}

/// Delete the calling user's account along with all their messages and
/// friend relationships.
pub async fn delete_me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let me = claims.sub.to_string();
    tokio::task::spawn_blocking(move || db.delete_user(&me))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(serde_json::json!({ "message": "account deleted" })))
}
