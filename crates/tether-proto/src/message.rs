//! Wire messages.
//!
//! Both directions use internally tagged JSON objects:
//!
//! ```json
//! {"type": "join_room", "room_id": "m1"}
//! {"type": "event", "name": "new_message", "payload": {"...": "..."}}
//! ```

use serde::{Deserialize, Serialize};

use crate::{MessageId, RoomId};

/// Message sent from the client to the server.
///
/// # Security
///
/// - **Debug Redaction**: The `Debug` impl redacts the bearer token carried by
///   [`ClientMessage::Authenticate`].
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Present the bearer token for this socket.
    Authenticate {
        /// Opaque bearer token issued by the authentication service.
        token: String,
    },
    /// Subscribe to a room's events.
    JoinRoom {
        /// Room to join.
        room_id: RoomId,
    },
    /// Unsubscribe from a room's events.
    LeaveRoom {
        /// Room to leave.
        room_id: RoomId,
    },
    /// The local user started typing in a room.
    TypingStart {
        /// Room the user is typing in.
        room_id: RoomId,
    },
    /// The local user stopped typing in a room.
    TypingStop {
        /// Room the user was typing in.
        room_id: RoomId,
    },
    /// Acknowledge that a message has been read.
    MarkRead {
        /// Message that was read.
        message_id: MessageId,
        /// Room the message belongs to.
        room_id: RoomId,
    },
}

impl ClientMessage {
    /// Wire name of the message type.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Authenticate { .. } => "authenticate",
            Self::JoinRoom { .. } => "join_room",
            Self::LeaveRoom { .. } => "leave_room",
            Self::TypingStart { .. } => "typing_start",
            Self::TypingStop { .. } => "typing_stop",
            Self::MarkRead { .. } => "mark_read",
        }
    }

    /// Room this message targets, if any.
    pub fn room_id(&self) -> Option<&RoomId> {
        match self {
            Self::Authenticate { .. } => None,
            Self::JoinRoom { room_id }
            | Self::LeaveRoom { room_id }
            | Self::TypingStart { room_id }
            | Self::TypingStop { room_id }
            | Self::MarkRead { room_id, .. } => Some(room_id),
        }
    }
}

impl std::fmt::Debug for ClientMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Authenticate { token } => f
                .debug_struct("Authenticate")
                .field("token", &format!("<redacted {} bytes>", token.len()))
                .finish(),
            Self::JoinRoom { room_id } => {
                f.debug_struct("JoinRoom").field("room_id", room_id).finish()
            },
            Self::LeaveRoom { room_id } => {
                f.debug_struct("LeaveRoom").field("room_id", room_id).finish()
            },
            Self::TypingStart { room_id } => {
                f.debug_struct("TypingStart").field("room_id", room_id).finish()
            },
            Self::TypingStop { room_id } => {
                f.debug_struct("TypingStop").field("room_id", room_id).finish()
            },
            Self::MarkRead { message_id, room_id } => f
                .debug_struct("MarkRead")
                .field("message_id", message_id)
                .field("room_id", room_id)
                .finish(),
        }
    }
}

/// Message sent from the server to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The token presented on this socket was accepted.
    Authenticated,
    /// The token presented on this socket was rejected.
    Unauthorized {
        /// Optional human-readable rejection reason.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// A named domain event (new message, presence change, ...).
    Event {
        /// Event name, e.g. `new_message`.
        name: String,
        /// Event payload, forwarded verbatim.
        #[serde(default)]
        payload: serde_json::Value,
    },
}
