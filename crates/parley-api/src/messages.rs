use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{error, warn};
use uuid::Uuid;

use parley_db::models::MessageRow;
use parley_types::api::Claims;
use parley_types::models::{MessagePayload, Reaction};

use crate::auth::AppState;

const HISTORY_LIMIT: u32 = 500;

/// Conversation history with a friend, oldest first, excluding messages the
/// caller deleted for themselves.
pub async fn get_conversation(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let me = claims.sub.to_string();
    let other = user_id.to_string();

    // Run all blocking DB queries off the async runtime
    let (rows, seen_rows, reaction_rows) = tokio::task::spawn_blocking(move || {
        if !db
            .are_friends(&me, &other)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        {
            return Err(StatusCode::FORBIDDEN);
        }

        let rows = db
            .get_conversation(&me, &other, &me, HISTORY_LIMIT)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        let message_ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
        let seen_rows = db
            .get_seen_for_messages(&message_ids)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
        let reaction_rows = db
            .get_reactions_for_messages(&message_ids)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

        Ok::<_, StatusCode>((rows, seen_rows, reaction_rows))
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })??;

    // Group seen/reaction rows by message id (cheap in-memory work)
    let mut seen_map: HashMap<String, Vec<Uuid>> = HashMap::new();
    for s in &seen_rows {
        if let Ok(uid) = s.user_id.parse::<Uuid>() {
            seen_map.entry(s.message_id.clone()).or_default().push(uid);
        }
    }

    let mut reaction_map: HashMap<String, Vec<Reaction>> = HashMap::new();
    for r in &reaction_rows {
        if let Ok(uid) = r.user_id.parse::<Uuid>() {
            reaction_map
                .entry(r.message_id.clone())
                .or_default()
                .push(Reaction {
                    user_id: uid,
                    emoji: r.emoji.clone(),
                });
        }
    }

    let messages: Vec<MessagePayload> = rows
        .into_iter()
        .map(|row| {
            let seen_by = seen_map.remove(&row.id).unwrap_or_default();
            let reactions = reaction_map.remove(&row.id).unwrap_or_default();
            payload_from_row(row, seen_by, reactions)
        })
        .collect();

    Ok(Json(messages))
}

/// Hard-delete both directions of a conversation.
pub async fn delete_conversation(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let me = claims.sub.to_string();
    let other = user_id.to_string();

    let deleted = tokio::task::spawn_blocking(move || db.delete_conversation(&me, &other))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(serde_json::json!({ "deleted_count": deleted })))
}

/// Hide a message from the caller's own view only. Idempotent.
pub async fn delete_for_me(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let me = claims.sub.to_string();
    tokio::task::spawn_blocking(move || {
        let mid = message_id.to_string();
        db.get_message(&mid)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .ok_or(StatusCode::NOT_FOUND)?;

        db.delete_message_for_user(&mid, &me)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })??;

    Ok(Json(serde_json::json!({ "message": "deleted for you" })))
}

/// Remove a message for both parties. Only the sender may do this.
pub async fn delete_for_everyone(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, StatusCode> {
    let db = state.db.clone();
    let me = claims.sub.to_string();
    tokio::task::spawn_blocking(move || {
        let mid = message_id.to_string();
        let row = db
            .get_message(&mid)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .ok_or(StatusCode::NOT_FOUND)?;

        if row.sender_id != me {
            return Err(StatusCode::FORBIDDEN);
        }

        db.delete_message(&mid)
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })??;

    Ok(Json(serde_json::json!({ "message": "deleted for everyone" })))
}

fn payload_from_row(row: MessageRow, seen_by: Vec<Uuid>, reactions: Vec<Reaction>) -> MessagePayload {
    MessagePayload {
        id: row.id.parse().unwrap_or_else(|e| {
            warn!("Corrupt message id '{}': {}", row.id, e);
            Uuid::default()
        }),
        sender: row.sender_id.parse().unwrap_or_else(|e| {
            warn!("Corrupt sender_id '{}' on message '{}': {}", row.sender_id, row.id, e);
            Uuid::default()
        }),
        recipient: row.recipient_id.parse().unwrap_or_else(|e| {
            warn!("Corrupt recipient_id '{}' on message '{}': {}", row.recipient_id, row.id, e);
            Uuid::default()
        }),
        content: row.content,
        reply_to: row.reply_to.as_deref().and_then(|r| r.parse().ok()),
        seen_by,
        reactions,
        created_at: row
            .created_at
            .parse::<chrono::DateTime<chrono::Utc>>()
            .unwrap_or_else(|e| {
                warn!("Corrupt created_at '{}' on message '{}': {}", row.created_at, row.id, e);
                chrono::DateTime::default()
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use parley_db::Database;
    use parley_gateway::dispatcher::Dispatcher;

    use crate::auth::{AppState, AppStateInner};

    fn test_state() -> AppState {
        Arc::new(AppStateInner {
            db: Arc::new(Database::open_in_memory().unwrap()),
            jwt_secret: "secret".into(),
            dispatcher: Dispatcher::new(),
        })
    }

    fn claims_for(id: Uuid, username: &str) -> Claims {
        Claims {
            sub: id,
            username: username.into(),
            exp: 0,
        }
    }

    fn seed_user(state: &AppState, username: &str) -> Uuid {
        let id = Uuid::new_v4();
        state
            .db
            .create_user(&id.to_string(), username, "hash")
            .unwrap();
        id
    }

    fn seed_message(state: &AppState, sender: Uuid, recipient: Uuid) -> Uuid {
        let id = Uuid::new_v4();
        state
            .db
            .insert_message(
                &id.to_string(),
                &sender.to_string(),
                &recipient.to_string(),
                "hi",
                None,
                &chrono::Utc::now().to_rfc3339(),
            )
            .unwrap();
        id
    }

    #[tokio::test]
    async fn deleting_for_me_hides_only_the_callers_copy() {
        let state = test_state();
        let alice = seed_user(&state, "alice");
        let bob = seed_user(&state, "bob");
        let mid = seed_message(&state, alice, bob);

        assert!(
            delete_for_me(
                State(state.clone()),
                Path(mid),
                Extension(claims_for(bob, "bob")),
            )
            .await
            .is_ok()
        );
        // Idempotent: a second delete still succeeds
        assert!(
            delete_for_me(
                State(state.clone()),
                Path(mid),
                Extension(claims_for(bob, "bob")),
            )
            .await
            .is_ok()
        );

        let bob_view = state
            .db
            .get_conversation(&bob.to_string(), &alice.to_string(), &bob.to_string(), 500)
            .unwrap();
        assert!(bob_view.is_empty());

        let alice_view = state
            .db
            .get_conversation(&alice.to_string(), &bob.to_string(), &alice.to_string(), 500)
            .unwrap();
        assert_eq!(alice_view.len(), 1);
    }

    #[tokio::test]
    async fn only_the_sender_may_delete_for_everyone() {
        let state = test_state();
        let alice = seed_user(&state, "alice");
        let bob = seed_user(&state, "bob");
        let mid = seed_message(&state, alice, bob);

        match delete_for_everyone(
            State(state.clone()),
            Path(mid),
            Extension(claims_for(bob, "bob")),
        )
        .await
        {
            Err(code) => assert_eq!(code, StatusCode::FORBIDDEN),
            Ok(_) => panic!("non-sender must not hard-delete"),
        }

        assert!(
            delete_for_everyone(
                State(state.clone()),
                Path(mid),
                Extension(claims_for(alice, "alice")),
            )
            .await
            .is_ok()
        );
        assert!(state.db.get_message(&mid.to_string()).unwrap().is_none());
    }
}
