use crate::Database;
use crate::models::{
    FriendRequestRow, MessageRow, PendingRequestRow, ReactionRow, SeenRow, UserRow,
};
use anyhow::Result;
use rusqlite::{Connection, OptionalExtension};

impl Database {
    // -- Users --

    pub fn create_user(&self, id: &str, username: &str, password_hash: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password) VALUES (?1, ?2, ?3)",
                (id, username, password_hash),
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    pub fn list_users_except(&self, id: &str) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, username, password, created_at FROM users
                 WHERE id != ?1 ORDER BY username",
            )?;
            let rows = stmt
                .query_map([id], user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Delete an account plus every message the user sent or received and
    /// every friend relationship they were party to.
    pub fn delete_user(&self, id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM messages WHERE sender_id = ?1 OR recipient_id = ?1",
                [id],
            )?;
            conn.execute(
                "DELETE FROM friend_requests WHERE requester_id = ?1 OR recipient_id = ?1",
                [id],
            )?;
            conn.execute("DELETE FROM users WHERE id = ?1", [id])?;
            Ok(())
        })
    }

    // -- Messages --

    pub fn insert_message(
        &self,
        id: &str,
        sender_id: &str,
        recipient_id: &str,
        content: &str,
        reply_to: Option<&str>,
        created_at: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, sender_id, recipient_id, content, reply_to, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![id, sender_id, recipient_id, content, reply_to, created_at],
            )?;
            Ok(())
        })
    }

    pub fn get_message(&self, id: &str) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, sender_id, recipient_id, content, reply_to, created_at
                     FROM messages WHERE id = ?1",
                    [id],
                    message_from_row,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Both directions of a conversation, oldest first, excluding messages the
    /// viewer has deleted for themselves.
    pub fn get_conversation(
        &self,
        user_a: &str,
        user_b: &str,
        viewer: &str,
        limit: u32,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, sender_id, recipient_id, content, reply_to, created_at
                 FROM messages
                 WHERE ((sender_id = ?1 AND recipient_id = ?2)
                     OR (sender_id = ?2 AND recipient_id = ?1))
                   AND id NOT IN (SELECT message_id FROM message_deleted WHERE user_id = ?3)
                 ORDER BY created_at ASC
                 LIMIT ?4",
            )?;
            let rows = stmt
                .query_map(
                    rusqlite::params![user_a, user_b, viewer, limit],
                    message_from_row,
                )?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Hard-delete both directions of a conversation. Returns rows removed.
    pub fn delete_conversation(&self, user_a: &str, user_b: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let count = conn.execute(
                "DELETE FROM messages
                 WHERE (sender_id = ?1 AND recipient_id = ?2)
                    OR (sender_id = ?2 AND recipient_id = ?1)",
                [user_a, user_b],
            )?;
            Ok(count)
        })
    }

    /// Logical per-viewer deletion. Idempotent.
    pub fn delete_message_for_user(&self, message_id: &str, user_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO message_deleted (message_id, user_id) VALUES (?1, ?2)",
                [message_id, user_id],
            )?;
            Ok(())
        })
    }

    /// Hard-delete a message; seen/deleted/reaction rows cascade.
    pub fn delete_message(&self, message_id: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM messages WHERE id = ?1", [message_id])?;
            Ok(())
        })
    }

    // -- Seen receipts --

    /// Add `user_id` to the message's seen set. Returns true only if the row
    /// was newly inserted — the idempotence gate for the notify path.
    pub fn mark_seen(&self, message_id: &str, user_id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO message_seen (message_id, user_id) VALUES (?1, ?2)",
                [message_id, user_id],
            )?;
            Ok(inserted > 0)
        })
    }

    pub fn get_seen_for_messages(&self, message_ids: &[String]) -> Result<Vec<SeenRow>> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> =
                (1..=message_ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT message_id, user_id FROM message_seen WHERE message_id IN ({})",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> = message_ids
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();

            let rows = stmt
                .query_map(params.as_slice(), |row| {
                    Ok(SeenRow {
                        message_id: row.get(0)?,
                        user_id: row.get(1)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Reactions --

    /// Toggle a reaction: removes if present, inserts if not.
    /// Returns true if the reaction was added, false if removed.
    pub fn toggle_reaction(&self, message_id: &str, user_id: &str, emoji: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM reactions WHERE message_id = ?1 AND user_id = ?2 AND emoji = ?3",
                [message_id, user_id, emoji],
            )?;

            if removed > 0 {
                return Ok(false);
            }

            conn.execute(
                "INSERT INTO reactions (message_id, user_id, emoji) VALUES (?1, ?2, ?3)",
                [message_id, user_id, emoji],
            )?;
            Ok(true)
        })
    }

    pub fn get_reactions(&self, message_id: &str) -> Result<Vec<ReactionRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT message_id, user_id, emoji FROM reactions
                 WHERE message_id = ?1 ORDER BY rowid",
            )?;
            let rows = stmt
                .query_map([message_id], reaction_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Batch-fetch reactions for a set of message IDs.
    pub fn get_reactions_for_messages(&self, message_ids: &[String]) -> Result<Vec<ReactionRow>> {
        if message_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> =
                (1..=message_ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT message_id, user_id, emoji FROM reactions WHERE message_id IN ({})",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> = message_ids
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();

            let rows = stmt
                .query_map(params.as_slice(), reaction_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Friend requests --

    /// Any request row between the pair, either direction, any status.
    /// Creation must be gated on this returning None.
    pub fn find_request_between(
        &self,
        user_a: &str,
        user_b: &str,
    ) -> Result<Option<FriendRequestRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, requester_id, recipient_id, status, created_at
                     FROM friend_requests
                     WHERE (requester_id = ?1 AND recipient_id = ?2)
                        OR (requester_id = ?2 AND recipient_id = ?1)",
                    [user_a, user_b],
                    friend_request_from_row,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Whether an accepted friendship exists between the pair (either direction).
    pub fn are_friends(&self, user_a: &str, user_b: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<String> = conn
                .query_row(
                    "SELECT id FROM friend_requests
                     WHERE status = 'accepted'
                       AND ((requester_id = ?1 AND recipient_id = ?2)
                         OR (requester_id = ?2 AND recipient_id = ?1))",
                    [user_a, user_b],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    pub fn create_friend_request(
        &self,
        id: &str,
        requester_id: &str,
        recipient_id: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO friend_requests (id, requester_id, recipient_id, status)
                 VALUES (?1, ?2, ?3, 'pending')",
                [id, requester_id, recipient_id],
            )?;
            Ok(())
        })
    }

    pub fn get_friend_request(&self, id: &str) -> Result<Option<FriendRequestRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, requester_id, recipient_id, status, created_at
                     FROM friend_requests WHERE id = ?1",
                    [id],
                    friend_request_from_row,
                )
                .optional()?;
            Ok(row)
        })
    }

    /// One-way transition out of `pending`. Returns false if the request was
    /// already settled, so racing accept/reject calls can't flip a decision.
    pub fn set_request_status(&self, id: &str, status: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE friend_requests SET status = ?2
                 WHERE id = ?1 AND status = 'pending'",
                [id, status],
            )?;
            Ok(updated > 0)
        })
    }

    /// Pending requests addressed to `recipient_id`, newest first, with the
    /// requester's public fields joined in.
    pub fn pending_requests_for(&self, recipient_id: &str) -> Result<Vec<PendingRequestRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT fr.id, fr.requester_id, u.username, fr.created_at
                 FROM friend_requests fr
                 JOIN users u ON u.id = fr.requester_id
                 WHERE fr.recipient_id = ?1 AND fr.status = 'pending'
                 ORDER BY fr.created_at DESC",
            )?;
            let rows = stmt
                .query_map([recipient_id], |row| {
                    Ok(PendingRequestRow {
                        id: row.get(0)?,
                        requester_id: row.get(1)?,
                        requester_username: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// The other party of every accepted friendship involving `user_id`.
    pub fn friends_of(&self, user_id: &str) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.username, u.password, u.created_at
                 FROM friend_requests fr
                 JOIN users u ON u.id = CASE
                     WHEN fr.requester_id = ?1 THEN fr.recipient_id
                     ELSE fr.requester_id
                 END
                 WHERE fr.status = 'accepted'
                   AND (fr.requester_id = ?1 OR fr.recipient_id = ?1)
                 ORDER BY u.username",
            )?;
            let rows = stmt
                .query_map([user_id], user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Remove the relationship row between the pair, whatever its status.
    pub fn remove_friendship(&self, user_a: &str, user_b: &str) -> Result<usize> {
        self.with_conn(|conn| {
            let count = conn.execute(
                "DELETE FROM friend_requests
                 WHERE (requester_id = ?1 AND recipient_id = ?2)
                    OR (requester_id = ?2 AND recipient_id = ?1)",
                [user_a, user_b],
            )?;
            Ok(count)
        })
    }
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    // `column` is a compile-time constant, never user input
    let sql = format!(
        "SELECT id, username, password, created_at FROM users WHERE {} = ?1",
        column
    );
    let row = conn
        .query_row(&sql, [value], user_from_row)
        .optional()?;
    Ok(row)
}

fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        password: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn message_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        recipient_id: row.get(2)?,
        content: row.get(3)?,
        reply_to: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn reaction_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ReactionRow> {
    Ok(ReactionRow {
        message_id: row.get(0)?,
        user_id: row.get(1)?,
        emoji: row.get(2)?,
    })
}

fn friend_request_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<FriendRequestRow> {
    Ok(FriendRequestRow {
        id: row.get(0)?,
        requester_id: row.get(1)?,
        recipient_id: row.get(2)?,
        status: row.get(3)?,
        created_at: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use crate::Database;

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.create_user("alice", "alice", "hash-a").unwrap();
        db.create_user("bob", "bob", "hash-b").unwrap();
        db.create_user("carol", "carol", "hash-c").unwrap();
        db
    }

    fn insert_msg(db: &Database, id: &str, from: &str, to: &str, content: &str, at: &str) {
        db.insert_message(id, from, to, content, None, at).unwrap();
    }

    #[test]
    fn mark_seen_is_idempotent() {
        let db = test_db();
        insert_msg(&db, "m1", "alice", "bob", "hi", "2026-01-01T00:00:00Z");

        assert!(db.mark_seen("m1", "bob").unwrap());
        assert!(!db.mark_seen("m1", "bob").unwrap());

        let seen = db.get_seen_for_messages(&["m1".to_string()]).unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].user_id, "bob");
    }

    #[test]
    fn reaction_toggle_is_its_own_inverse() {
        let db = test_db();
        insert_msg(&db, "m1", "alice", "bob", "hi", "2026-01-01T00:00:00Z");

        assert!(db.toggle_reaction("m1", "bob", "👍").unwrap());
        assert_eq!(db.get_reactions("m1").unwrap().len(), 1);

        assert!(!db.toggle_reaction("m1", "bob", "👍").unwrap());
        assert!(db.get_reactions("m1").unwrap().is_empty());

        // Different emoji from the same user is a separate mark
        db.toggle_reaction("m1", "bob", "👍").unwrap();
        db.toggle_reaction("m1", "bob", "🎉").unwrap();
        assert_eq!(db.get_reactions("m1").unwrap().len(), 2);
    }

    #[test]
    fn one_request_per_pair_regardless_of_direction() {
        let db = test_db();
        db.create_friend_request("r1", "alice", "bob").unwrap();

        assert!(db.find_request_between("alice", "bob").unwrap().is_some());
        assert!(db.find_request_between("bob", "alice").unwrap().is_some());
        assert!(db.find_request_between("alice", "carol").unwrap().is_none());

        // The unique index blocks the reverse-direction duplicate too
        assert!(db.create_friend_request("r2", "bob", "alice").is_err());
    }

    #[test]
    fn friendship_requires_accepted_status() {
        let db = test_db();
        db.create_friend_request("r1", "alice", "bob").unwrap();
        assert!(!db.are_friends("alice", "bob").unwrap());

        assert!(db.set_request_status("r1", "accepted").unwrap());
        assert!(db.are_friends("alice", "bob").unwrap());
        assert!(db.are_friends("bob", "alice").unwrap());

        // Transitions out of pending are one-way
        assert!(!db.set_request_status("r1", "rejected").unwrap());
        assert!(db.are_friends("alice", "bob").unwrap());
    }

    #[test]
    fn pending_requests_join_requester_fields() {
        let db = test_db();
        db.create_friend_request("r1", "alice", "bob").unwrap();
        db.create_friend_request("r2", "carol", "bob").unwrap();

        let pending = db.pending_requests_for("bob").unwrap();
        assert_eq!(pending.len(), 2);
        assert!(pending.iter().any(|r| r.requester_username == "alice"));

        db.set_request_status("r1", "accepted").unwrap();
        assert_eq!(db.pending_requests_for("bob").unwrap().len(), 1);

        let friends = db.friends_of("bob").unwrap();
        assert_eq!(friends.len(), 1);
        assert_eq!(friends[0].username, "alice");
    }

    #[test]
    fn conversation_excludes_messages_deleted_for_viewer() {
        let db = test_db();
        insert_msg(&db, "m1", "alice", "bob", "one", "2026-01-01T00:00:01Z");
        insert_msg(&db, "m2", "bob", "alice", "two", "2026-01-01T00:00:02Z");
        insert_msg(&db, "m3", "alice", "bob", "three", "2026-01-01T00:00:03Z");

        db.delete_message_for_user("m2", "alice").unwrap();

        let for_alice = db.get_conversation("alice", "bob", "alice", 500).unwrap();
        assert_eq!(
            for_alice.iter().map(|m| m.id.as_str()).collect::<Vec<_>>(),
            vec!["m1", "m3"]
        );

        // Bob still sees all three, oldest first
        let for_bob = db.get_conversation("alice", "bob", "bob", 500).unwrap();
        assert_eq!(for_bob.len(), 3);
        assert_eq!(for_bob[0].id, "m1");
    }

    #[test]
    fn hard_delete_cascades_child_rows() {
        let db = test_db();
        insert_msg(&db, "m1", "alice", "bob", "hi", "2026-01-01T00:00:00Z");
        db.mark_seen("m1", "bob").unwrap();
        db.toggle_reaction("m1", "bob", "👍").unwrap();

        // A reply pointing at the deleted message is orphaned, not blocked
        db.insert_message("m2", "bob", "alice", "re: hi", Some("m1"), "2026-01-01T00:00:01Z")
            .unwrap();

        db.delete_message("m1").unwrap();

        assert!(db.get_message("m1").unwrap().is_none());
        assert!(db.get_seen_for_messages(&["m1".to_string()]).unwrap().is_empty());
        assert!(db.get_reactions("m1").unwrap().is_empty());
        assert!(db.get_message("m2").unwrap().unwrap().reply_to.is_none());
    }

    #[test]
    fn delete_user_removes_messages_and_relationships() {
        let db = test_db();
        insert_msg(&db, "m1", "alice", "bob", "hi", "2026-01-01T00:00:00Z");
        db.create_friend_request("r1", "alice", "bob").unwrap();

        db.delete_user("alice").unwrap();

        assert!(db.get_user_by_id("alice").unwrap().is_none());
        assert!(db.get_message("m1").unwrap().is_none());
        assert!(db.find_request_between("alice", "bob").unwrap().is_none());
    }
}
