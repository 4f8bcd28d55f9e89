//! Typed server events.
//!
//! The server names every domain event. Known names are parsed into a typed
//! payload; anything else is carried verbatim in [`ServerEvent::Other`].

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{MessageId, RoomId, UserId};

/// Wire name of [`ServerEvent::NewMessage`].
pub const NEW_MESSAGE: &str = "new_message";
/// Wire name of [`ServerEvent::Presence`].
pub const PRESENCE: &str = "presence";
/// Wire name of [`ServerEvent::Typing`].
pub const TYPING: &str = "typing";
/// Wire name of [`ServerEvent::MessagesRead`].
pub const MESSAGES_READ: &str = "messages_read";
/// Wire name of [`ServerEvent::RoomUnlocked`].
pub const ROOM_UNLOCKED: &str = "room_unlocked";

/// A chat message delivered to a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message identifier.
    pub id: MessageId,
    /// Room the message was posted in.
    pub room_id: RoomId,
    /// Author of the message.
    pub sender_id: UserId,
    /// Message text.
    #[serde(default)]
    pub body: String,
    /// Server timestamp, milliseconds since the Unix epoch.
    #[serde(default)]
    pub sent_at_ms: u64,
}

/// A user's online status changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceChange {
    /// User whose presence changed.
    pub user_id: UserId,
    /// Whether the user is now online.
    pub online: bool,
    /// Last time the user was seen, milliseconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen_ms: Option<u64>,
}

/// A remote user started or stopped typing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingIndicator {
    /// Room the user is typing in.
    pub room_id: RoomId,
    /// User who is typing.
    pub user_id: UserId,
    /// `true` on start, `false` on stop.
    pub typing: bool,
}

/// A remote user read messages up to `message_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadReceipt {
    /// Room the receipt applies to.
    pub room_id: RoomId,
    /// Last message read.
    pub message_id: MessageId,
    /// User who read it.
    pub reader_id: UserId,
}

/// A room became available to chat in (the match was unlocked).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomUnlocked {
    /// Room that was unlocked.
    pub room_id: RoomId,
}

/// Domain event received from the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// `new_message`
    NewMessage(ChatMessage),
    /// `presence`
    Presence(PresenceChange),
    /// `typing`
    Typing(TypingIndicator),
    /// `messages_read`
    MessagesRead(ReadReceipt),
    /// `room_unlocked`
    RoomUnlocked(RoomUnlocked),
    /// Any event without a typed payload, forwarded verbatim.
    Other {
        /// Event name as sent by the server.
        name: String,
        /// Raw payload.
        payload: serde_json::Value,
    },
}

impl ServerEvent {
    /// Lift a named wire event into its typed form.
    ///
    /// A known name whose payload does not match the expected shape falls back
    /// to [`ServerEvent::Other`] so the event is never lost.
    pub fn from_wire(name: &str, payload: serde_json::Value) -> Self {
        match name {
            NEW_MESSAGE => typed(name, payload, Self::NewMessage),
            PRESENCE => typed(name, payload, Self::Presence),
            TYPING => typed(name, payload, Self::Typing),
            MESSAGES_READ => typed(name, payload, Self::MessagesRead),
            ROOM_UNLOCKED => typed(name, payload, Self::RoomUnlocked),
            _ => Self::Other { name: name.to_string(), payload },
        }
    }

    /// Wire name of this event.
    pub fn name(&self) -> &str {
        match self {
            Self::NewMessage(_) => NEW_MESSAGE,
            Self::Presence(_) => PRESENCE,
            Self::Typing(_) => TYPING,
            Self::MessagesRead(_) => MESSAGES_READ,
            Self::RoomUnlocked(_) => ROOM_UNLOCKED,
            Self::Other { name, .. } => name,
        }
    }

    /// Room this event belongs to, if it is room-scoped.
    pub fn room_id(&self) -> Option<&RoomId> {
        match self {
            Self::NewMessage(msg) => Some(&msg.room_id),
            Self::Typing(typing) => Some(&typing.room_id),
            Self::MessagesRead(receipt) => Some(&receipt.room_id),
            Self::RoomUnlocked(unlocked) => Some(&unlocked.room_id),
            Self::Presence(_) | Self::Other { .. } => None,
        }
    }

    /// Convert back to the wire representation.
    pub fn to_wire(&self) -> (String, serde_json::Value) {
        let payload = match self {
            Self::NewMessage(msg) => serde_json::to_value(msg),
            Self::Presence(presence) => serde_json::to_value(presence),
            Self::Typing(typing) => serde_json::to_value(typing),
            Self::MessagesRead(receipt) => serde_json::to_value(receipt),
            Self::RoomUnlocked(unlocked) => serde_json::to_value(unlocked),
            Self::Other { payload, .. } => Ok(payload.clone()),
        };

        (self.name().to_string(), payload.unwrap_or(serde_json::Value::Null))
    }
}

fn typed<T, F>(name: &str, payload: serde_json::Value, wrap: F) -> ServerEvent
where
    T: DeserializeOwned,
    F: FnOnce(T) -> ServerEvent,
{
    match serde_json::from_value::<T>(payload.clone()) {
        Ok(value) => wrap(value),
        Err(_) => ServerEvent::Other { name: name.to_string(), payload },
    }
}
