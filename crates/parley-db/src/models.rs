/// Database row types — these map directly to SQLite rows.
/// Distinct from parley-types wire models to keep the DB layer independent.

pub struct UserRow {
    pub id: String,
    pub username: String,
    pub password: String,
    pub created_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub content: String,
    pub reply_to: Option<String>,
    pub created_at: String,
}

pub struct SeenRow {
    pub message_id: String,
    pub user_id: String,
}

pub struct ReactionRow {
    pub message_id: String,
    pub user_id: String,
    pub emoji: String,
}

pub struct FriendRequestRow {
    pub id: String,
    pub requester_id: String,
    pub recipient_id: String,
    pub status: String,
    pub created_at: String,
}

/// A pending friend request joined with the requester's public fields.
pub struct PendingRequestRow {
    pub id: String,
    pub requester_id: String,
    pub requester_username: String,
    pub created_at: String,
}
