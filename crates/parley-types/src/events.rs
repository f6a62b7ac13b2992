use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{MessagePayload, PublicUser, Reaction};

/// Commands sent FROM client TO server over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum GatewayCommand {
    /// Tell the recipient we started typing to them
    Typing { to: Uuid },

    /// Tell the recipient we stopped typing
    StopTyping { to: Uuid },

    /// Send a private message. The server replies with a `message_ack`
    /// carrying either the persisted payload or a rejection reason.
    PrivateMessage {
        to: Uuid,
        content: String,
        #[serde(default)]
        reply_to: Option<Uuid>,
    },

    /// Record that we viewed a message. Idempotent.
    MarkAsSeen { message_id: Uuid },

    /// Toggle an emoji reaction on a message
    AddReaction { message_id: Uuid, emoji: String },

    /// Ask another user to become friends. The server replies with a
    /// `friend_request_sent` event.
    SendFriendRequest { recipient_id: Uuid },

    /// Accept a pending friend request addressed to us
    AcceptFriendRequest { request_id: Uuid },
}

/// Events sent FROM server TO clients over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// Server confirms the connection is authenticated and live
    Ready { user_id: Uuid, username: String },

    /// Full presence snapshot, sent once right after `ready`
    OnlineUsers { user_ids: Vec<Uuid> },

    /// Another user connected
    UserOnline { user_id: Uuid },

    /// Another user disconnected
    UserOffline { user_id: Uuid },

    /// The sender is typing to us
    UserTyping { from: Uuid },

    /// The sender stopped typing
    UserStopTyping { from: Uuid },

    /// A private message addressed to this connection's user
    PrivateMessage { message: MessagePayload },

    /// Synchronous reply to a `private_message` command. `message` is set
    /// on success, `reason` on rejection.
    MessageAck {
        ok: bool,
        message: Option<MessagePayload>,
        reason: Option<String>,
    },

    /// A user was added to a message's seen set
    MessageSeen { message_id: Uuid, user_id: Uuid },

    /// The complete reaction list for a message after a toggle. Sending the
    /// full list (not a delta) lets clients self-heal from missed updates.
    ReactionUpdated {
        message_id: Uuid,
        reactions: Vec<Reaction>,
    },

    /// Someone sent us a friend request
    FriendRequestReceived {
        request_id: Uuid,
        requester: PublicUser,
    },

    /// A friend request we are party to was accepted; `friend` is the
    /// other side of the new friendship.
    FriendRequestAccepted { friend: PublicUser },

    /// Reply to a `send_friend_request` command
    FriendRequestSent {
        recipient_id: Uuid,
        status: String,
        message: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_wire_names_are_snake_case() {
        let cmd: GatewayCommand =
            serde_json::from_str(r#"{"type":"typing","data":{"to":"8c4d8b6e-7a2f-4f0a-9b1d-000000000001"}}"#)
                .unwrap();
        assert!(matches!(cmd, GatewayCommand::Typing { .. }));

        let cmd: GatewayCommand = serde_json::from_str(
            r#"{"type":"private_message","data":{"to":"8c4d8b6e-7a2f-4f0a-9b1d-000000000001","content":"hi"}}"#,
        )
        .unwrap();
        match cmd {
            GatewayCommand::PrivateMessage { content, reply_to, .. } => {
                assert_eq!(content, "hi");
                assert!(reply_to.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn event_envelope_has_type_and_data() {
        let event = GatewayEvent::UserOnline {
            user_id: Uuid::nil(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "user_online");
        assert_eq!(json["data"]["user_id"], Uuid::nil().to_string());
    }
}
