use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{error, warn};
use uuid::Uuid;

use parley_types::api::{Claims, FriendRequestView, SendFriendRequestBody};
use parley_types::events::GatewayEvent;
use parley_types::models::PublicUser;

use crate::auth::AppState;

/// Ask another user to become friends. Mirrors the gateway command: any
/// existing record between the pair, in either direction and whatever its
/// status, blocks a new request.
pub async fn send_request(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(body): Json<SendFriendRequestBody>,
) -> Result<impl IntoResponse, StatusCode> {
    if body.recipient_id == claims.sub {
        return Err(StatusCode::BAD_REQUEST);
    }

    let request_id = Uuid::new_v4();
    let db = state.db.clone();
    let me = claims.sub.to_string();
    let recipient = body.recipient_id.to_string();
    let rid = request_id.to_string();
    tokio::task::spawn_blocking(move || {
        db.get_user_by_id(&recipient)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .ok_or(StatusCode::NOT_FOUND)?;

        if db
            .find_request_between(&me, &recipient)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .is_some()
        {
            return Err(StatusCode::BAD_REQUEST);
        }

        db.create_friend_request(&rid, &me, &recipient)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })??;

    // Live push so an online recipient sees the request without refetching
    state
        .dispatcher
        .send_to_user(
            body.recipient_id,
            GatewayEvent::FriendRequestReceived {
                request_id,
                requester: PublicUser {
                    id: claims.sub,
                    username: claims.username.clone(),
                },
            },
        )
        .await;

    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({ "message": "friend request sent", "request_id": request_id })),
    ))
}

/// Accept a pending request addressed to the caller.
pub async fn accept_request(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let me = claims.sub.to_string();
    let requester = tokio::task::spawn_blocking(move || {
        let request = db
            .get_friend_request(&request_id.to_string())
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .ok_or(StatusCode::NOT_FOUND)?;

        if request.recipient_id != me {
            return Err(StatusCode::FORBIDDEN);
        }

        if !db
            .set_request_status(&request.id, "accepted")
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        {
            return Err(StatusCode::CONFLICT);
        }

        db.get_user_by_id(&request.requester_id)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })??;

    // Both parties learn the other side's identity over the gateway
    if let Some(requester) = requester {
        if let Ok(requester_id) = requester.id.parse::<Uuid>() {
            state
                .dispatcher
                .send_to_user(
                    requester_id,
                    GatewayEvent::FriendRequestAccepted {
                        friend: PublicUser {
                            id: claims.sub,
                            username: claims.username.clone(),
                        },
                    },
                )
                .await;
            state
                .dispatcher
                .send_to_user(
                    claims.sub,
                    GatewayEvent::FriendRequestAccepted {
                        friend: PublicUser {
                            id: requester_id,
                            username: requester.username,
                        },
                    },
                )
                .await;
        } else {
            warn!("Corrupt requester_id on request {}", request_id);
        }
    }

    Ok(Json(serde_json::json!({ "message": "friend request accepted" })))
}

/// Reject a pending request addressed to the caller. The record is kept, so
/// the pair cannot re-request later.
pub async fn reject_request(
    State(state): State<AppState>,
    Path(request_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let me = claims.sub.to_string();
    tokio::task::spawn_blocking(move || {
        let request = db
            .get_friend_request(&request_id.to_string())
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .ok_or(StatusCode::NOT_FOUND)?;

        if request.recipient_id != me {
            return Err(StatusCode::FORBIDDEN);
        }

        if !db
            .set_request_status(&request.id, "rejected")
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        {
            return Err(StatusCode::CONFLICT);
        }

        Ok(())
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })??;

    Ok(Json(serde_json::json!({ "message": "friend request rejected" })))
}

/// Pending requests addressed to the caller, newest first. This is how a
/// recipient who was offline when the live push went out catches up.
pub async fn pending_requests(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let me = claims.sub.to_string();
    let rows = tokio::task::spawn_blocking(move || db.pending_requests_for(&me))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let requests: Vec<FriendRequestView> = rows
        .into_iter()
        .filter_map(|row| {
            Some(FriendRequestView {
                id: row.id.parse().ok()?,
                requester: PublicUser {
                    id: row.requester_id.parse().ok()?,
                    username: row.requester_username,
                },
                created_at: parse_db_timestamp(&row.created_at)?,
            })
        })
        .collect();

    Ok(Json(requests))
}

/// The other party of each accepted friendship.
pub async fn friends_list(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let me = claims.sub.to_string();
    let rows = tokio::task::spawn_blocking(move || db.friends_of(&me))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let friends: Vec<PublicUser> = rows
        .into_iter()
        .filter_map(|row| {
            Some(PublicUser {
                id: row.id.parse().ok()?,
                username: row.username,
            })
        })
        .collect();

    Ok(Json(friends))
}

/// Drop the relationship with another user, whatever its status.
pub async fn remove_friend(
    State(state): State<AppState>,
    Path(friend_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let me = claims.sub.to_string();
    tokio::task::spawn_blocking(move || db.remove_friendship(&me, &friend_id.to_string()))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(serde_json::json!({ "message": "friend removed" })))
}

/// SQLite's datetime('now') default stores "YYYY-MM-DD HH:MM:SS" without a
/// timezone; fall back to parsing that as naive UTC.
fn parse_db_timestamp(value: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    value
        .parse::<chrono::DateTime<chrono::Utc>>()
        .ok()
        .or_else(|| {
            chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
                .map(|ndt| ndt.and_utc())
                .ok()
        })
}
