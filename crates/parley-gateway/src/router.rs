use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use parley_db::Database;
use parley_types::events::{GatewayCommand, GatewayEvent};
use parley_types::models::{MessagePayload, PublicUser, Reaction};

use crate::dispatcher::Dispatcher;

/// Why an inbound event was rejected. Store failures never escape the
/// router; they are logged and surfaced to the initiator as a generic
/// failure, and the event is treated as not-happened.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("{0}")]
    Invalid(&'static str),
    #[error("you can only message friends")]
    NotFriends,
    #[error("not found")]
    NotFound,
    #[error("not addressed to you")]
    Forbidden,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl EventError {
    fn ack_reason(&self) -> &'static str {
        match self {
            EventError::Invalid(_) => "invalid",
            EventError::NotFriends => "not-friends",
            EventError::NotFound => "not-found",
            EventError::Forbidden => "forbidden",
            EventError::Store(_) => "failed",
        }
    }
}

/// Dispatch one inbound command from an authenticated connection. Every
/// handler persists before it notifies, and no failure here may touch the
/// registry or any other connection.
pub async fn handle_command(
    dispatcher: &Dispatcher,
    db: &Arc<Database>,
    user_id: Uuid,
    username: &str,
    cmd: GatewayCommand,
) {
    match cmd {
        GatewayCommand::Typing { to } => {
            // Absent recipient: silently dropped, no acknowledgment
            dispatcher
                .send_to_user(to, GatewayEvent::UserTyping { from: user_id })
                .await;
        }

        GatewayCommand::StopTyping { to } => {
            dispatcher
                .send_to_user(to, GatewayEvent::UserStopTyping { from: user_id })
                .await;
        }

        GatewayCommand::PrivateMessage {
            to,
            content,
            reply_to,
        } => match with_store(db, move |db| {
            send_private_message(db, user_id, to, &content, reply_to)
        })
        .await
        {
            Ok(message) => {
                let message_id = message.id;
                // Ack the sender first; delivery to the recipient is
                // best-effort and independent of it.
                dispatcher
                    .send_to_user(
                        user_id,
                        GatewayEvent::MessageAck {
                            ok: true,
                            message: Some(message.clone()),
                            reason: None,
                        },
                    )
                    .await;
                dispatcher
                    .send_to_user(to, GatewayEvent::PrivateMessage { message })
                    .await;
                // Delivery marker: the message reached the recipient's device.
                // Distinct from a user-initiated mark_as_seen.
                dispatcher
                    .send_to_user(
                        to,
                        GatewayEvent::MessageSeen {
                            message_id,
                            user_id: to,
                        },
                    )
                    .await;
            }
            Err(err) => {
                if let EventError::Store(ref e) = err {
                    warn!("private_message from {} failed to persist: {}", user_id, e);
                }
                dispatcher
                    .send_to_user(
                        user_id,
                        GatewayEvent::MessageAck {
                            ok: false,
                            message: None,
                            reason: Some(err.ack_reason().to_string()),
                        },
                    )
                    .await;
            }
        },

        GatewayCommand::MarkAsSeen { message_id } => {
            match with_store(db, move |db| record_seen(db, user_id, message_id)).await {
                Ok(Some(sender)) => {
                    dispatcher
                        .send_to_user(
                            sender,
                            GatewayEvent::MessageSeen {
                                message_id,
                                user_id,
                            },
                        )
                        .await;
                }
                Ok(None) => {}
                Err(err) => warn!("mark_as_seen from {} failed: {}", user_id, err),
            }
        }

        GatewayCommand::AddReaction { message_id, emoji } => {
            match with_store(db, move |db| {
                apply_reaction(db, user_id, message_id, &emoji)
            })
            .await
            {
                Ok(Some((sender, recipient, reactions))) => {
                    let event = GatewayEvent::ReactionUpdated {
                        message_id,
                        reactions,
                    };
                    if let Some(sender) = sender {
                        dispatcher.send_to_user(sender, event.clone()).await;
                    }
                    if let Some(recipient) = recipient {
                        dispatcher.send_to_user(recipient, event).await;
                    }
                }
                Ok(None) => {}
                Err(err) => warn!("add_reaction from {} failed: {}", user_id, err),
            }
        }

        GatewayCommand::SendFriendRequest { recipient_id } => {
            match with_store(db, move |db| {
                send_friend_request(db, user_id, recipient_id)
            })
            .await
            {
                Ok(request_id) => {
                    dispatcher
                        .send_to_user(
                            user_id,
                            GatewayEvent::FriendRequestSent {
                                recipient_id,
                                status: "success".into(),
                                message: None,
                            },
                        )
                        .await;
                    dispatcher
                        .send_to_user(
                            recipient_id,
                            GatewayEvent::FriendRequestReceived {
                                request_id,
                                requester: PublicUser {
                                    id: user_id,
                                    username: username.to_string(),
                                },
                            },
                        )
                        .await;
                }
                Err(err) => {
                    if let EventError::Store(ref e) = err {
                        warn!("friend request from {} failed to persist: {}", user_id, e);
                    }
                    dispatcher
                        .send_to_user(
                            user_id,
                            GatewayEvent::FriendRequestSent {
                                recipient_id,
                                status: "error".into(),
                                message: Some(err.to_string()),
                            },
                        )
                        .await;
                }
            }
        }

        GatewayCommand::AcceptFriendRequest { request_id } => {
            match with_store(db, move |db| accept_friend_request(db, user_id, request_id)).await {
                Ok(Some((requester, recipient))) => {
                    // Each side learns the OTHER party's identity so its
                    // friends list can update without a full reload
                    dispatcher
                        .send_to_user(
                            requester.id,
                            GatewayEvent::FriendRequestAccepted {
                                friend: recipient.clone(),
                            },
                        )
                        .await;
                    dispatcher
                        .send_to_user(
                            recipient.id,
                            GatewayEvent::FriendRequestAccepted { friend: requester },
                        )
                        .await;
                }
                Ok(None) => {}
                Err(err) => warn!(
                    "accept_friend_request {} by {} failed: {}",
                    request_id, user_id, err
                ),
            }
        }
    }
}

/// Run blocking store work on the blocking pool. A slow or stuck query
/// stalls only the event that issued it, never an async worker thread; the
/// dispatcher pushes always happen back on the runtime afterwards.
async fn with_store<T, F>(db: &Arc<Database>, f: F) -> Result<T, EventError>
where
    T: Send + 'static,
    F: FnOnce(&Database) -> Result<T, EventError> + Send + 'static,
{
    let db = Arc::clone(db);
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| EventError::Store(anyhow::anyhow!("store task failed: {e}")))?
}

/// Validate, authorize and persist a private message. Persistence is the
/// source of truth; the caller notifies afterwards.
fn send_private_message(
    db: &Database,
    sender: Uuid,
    recipient: Uuid,
    content: &str,
    reply_to: Option<Uuid>,
) -> Result<MessagePayload, EventError> {
    let content = content.trim();
    if content.is_empty() {
        return Err(EventError::Invalid("recipient and message are required"));
    }

    if !db.are_friends(&sender.to_string(), &recipient.to_string())? {
        return Err(EventError::NotFriends);
    }

    let id = Uuid::new_v4();
    let created_at = Utc::now();
    db.insert_message(
        &id.to_string(),
        &sender.to_string(),
        &recipient.to_string(),
        content,
        reply_to.map(|r| r.to_string()).as_deref(),
        &created_at.to_rfc3339(),
    )?;

    Ok(MessagePayload {
        id,
        sender,
        recipient,
        content: content.to_string(),
        reply_to,
        seen_by: vec![],
        reactions: vec![],
        created_at,
    })
}

/// Record a seen mark. The INSERT OR IGNORE inside mark_seen is the
/// idempotence gate: only a fresh insert returns the sender to notify, so
/// rapid re-emission can't re-notify.
fn record_seen(db: &Database, user_id: Uuid, message_id: Uuid) -> Result<Option<Uuid>, EventError> {
    // Unknown message id: silent no-op, never fatal
    let Some(row) = db.get_message(&message_id.to_string())? else {
        return Ok(None);
    };

    if !db.mark_seen(&row.id, &user_id.to_string())? {
        debug!("{} already marked {} as seen", user_id, message_id);
        return Ok(None);
    }

    Ok(parse_uuid(&row.sender_id, "sender_id"))
}

/// Toggle a reaction mark and return (sender, recipient, full updated set).
/// The set is re-read after the toggle rather than trusting anything
/// pre-fetched; interleaved toggles on the same message settle on what the
/// store now holds. Both parties get the complete list so a missed prior
/// update self-heals.
#[allow(clippy::type_complexity)]
fn apply_reaction(
    db: &Database,
    user_id: Uuid,
    message_id: Uuid,
    emoji: &str,
) -> Result<Option<(Option<Uuid>, Option<Uuid>, Vec<Reaction>)>, EventError> {
    if emoji.trim().is_empty() {
        return Err(EventError::Invalid("emoji is required"));
    }

    let mid = message_id.to_string();
    let Some(row) = db.get_message(&mid)? else {
        return Ok(None);
    };

    db.toggle_reaction(&mid, &user_id.to_string(), emoji)?;

    let reactions: Vec<Reaction> = db
        .get_reactions(&mid)?
        .into_iter()
        .filter_map(|r| {
            Some(Reaction {
                user_id: parse_uuid(&r.user_id, "reaction user_id")?,
                emoji: r.emoji,
            })
        })
        .collect();

    Ok(Some((
        parse_uuid(&row.sender_id, "sender_id"),
        parse_uuid(&row.recipient_id, "recipient_id"),
        reactions,
    )))
}

fn send_friend_request(
    db: &Database,
    user_id: Uuid,
    recipient_id: Uuid,
) -> Result<Uuid, EventError> {
    if recipient_id == user_id {
        return Err(EventError::Invalid("cannot send a request to yourself"));
    }

    if db.get_user_by_id(&recipient_id.to_string())?.is_none() {
        return Err(EventError::NotFound);
    }

    // Any existing record between the pair blocks a new request, whichever
    // direction it was sent in and whatever its status.
    if db
        .find_request_between(&user_id.to_string(), &recipient_id.to_string())?
        .is_some()
    {
        return Err(EventError::Invalid(
            "a friend request already exists between these users",
        ));
    }

    let request_id = Uuid::new_v4();
    db.create_friend_request(
        &request_id.to_string(),
        &user_id.to_string(),
        &recipient_id.to_string(),
    )?;

    Ok(request_id)
}

/// Transition a pending request to accepted and return (requester,
/// recipient) public identities for notification.
fn accept_friend_request(
    db: &Database,
    user_id: Uuid,
    request_id: Uuid,
) -> Result<Option<(PublicUser, PublicUser)>, EventError> {
    let Some(request) = db.get_friend_request(&request_id.to_string())? else {
        return Err(EventError::NotFound);
    };

    if request.recipient_id != user_id.to_string() {
        return Err(EventError::Forbidden);
    }

    if !db.set_request_status(&request.id, "accepted")? {
        return Err(EventError::Invalid("request is no longer pending"));
    }

    let requester_row = db.get_user_by_id(&request.requester_id)?;
    let recipient_row = db.get_user_by_id(&request.recipient_id)?;
    let (Some(requester), Some(recipient)) = (requester_row, recipient_row) else {
        return Err(EventError::NotFound);
    };
    let (Some(requester_id), Some(recipient_id)) = (
        parse_uuid(&requester.id, "requester_id"),
        parse_uuid(&recipient.id, "recipient_id"),
    ) else {
        return Ok(None);
    };

    Ok(Some((
        PublicUser {
            id: requester_id,
            username: requester.username,
        },
        PublicUser {
            id: recipient_id,
            username: recipient.username,
        },
    )))
}

fn parse_uuid(value: &str, field: &str) -> Option<Uuid> {
    match value.parse::<Uuid>() {
        Ok(id) => Some(id),
        Err(e) => {
            warn!("Corrupt {} '{}': {}", field, value, e);
            None
        }
    }
}
