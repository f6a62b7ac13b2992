use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The identity fields of a user that are safe to show to other users.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicUser {
    pub id: Uuid,
    pub username: String,
}

/// A single emoji mark left on a message by one user. Toggling the same
/// `(user_id, emoji)` pair again removes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reaction {
    pub user_id: Uuid,
    pub emoji: String,
}

/// A private message as it travels over the wire — both in gateway events
/// and in conversation-history responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagePayload {
    pub id: Uuid,
    pub sender: Uuid,
    pub recipient: Uuid,
    pub content: String,
    pub reply_to: Option<Uuid>,
    pub seen_by: Vec<Uuid>,
    pub reactions: Vec<Reaction>,
    pub created_at: DateTime<Utc>,
}
