//! Client events and actions.
//!
//! Events flow into [`Client::handle`](crate::Client::handle); actions flow
//! out. Notifications are the subset of actions meant for UI subscribers.

use std::fmt;

use secrecy::SecretString;
use tether_core::ConnectionState;
use tether_proto::{ClientMessage, MessageId, RoomId, ServerEvent, ServerMessage, event as wire};

/// Identifies one physical transport connection.
///
/// Every open attempt gets a fresh id. Signals carrying an id other than the
/// current one belong to a connection the client already abandoned and are
/// ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wrap a raw id.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw id value.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Events fed into the client state machine.
#[derive(Debug, Clone)]
pub enum ClientEvent<I> {
    /// Caller asks to connect with a bearer token.
    Connect {
        /// Server base address (`wss://host/path`).
        server: String,
        /// Bearer token from the external token store.
        token: SecretString,
    },
    /// Caller asks for a full teardown.
    Disconnect,
    /// Transport finished its handshake.
    TransportOpened {
        /// Connection that opened.
        connection: ConnectionId,
    },
    /// Transport closed.
    TransportClosed {
        /// Connection that closed.
        connection: ConnectionId,
        /// Close reason, for logging.
        reason: String,
    },
    /// Transport failed (open failure or I/O error).
    TransportError {
        /// Connection that failed.
        connection: ConnectionId,
        /// Error description, for logging.
        reason: String,
    },
    /// A message arrived on the transport.
    MessageReceived {
        /// Connection the message arrived on.
        connection: ConnectionId,
        /// Decoded message.
        message: ServerMessage,
    },
    /// Clock tick; fires any deadline at or before `now`.
    Tick {
        /// Current time.
        now: I,
    },
    /// Join a room.
    JoinRoom {
        /// Room to join.
        room_id: RoomId,
    },
    /// Leave a room.
    LeaveRoom {
        /// Room to leave.
        room_id: RoomId,
    },
    /// Local user started typing.
    StartTyping {
        /// Room being typed in.
        room_id: RoomId,
    },
    /// Local user stopped typing.
    StopTyping {
        /// Room that was typed in.
        room_id: RoomId,
    },
    /// Local user read a message.
    MarkRead {
        /// Message that was read.
        message_id: MessageId,
        /// Room the message belongs to.
        room_id: RoomId,
    },
    /// Room currently on screen changed (`None` when no chat is open).
    SetActiveRoom {
        /// New active room.
        room_id: Option<RoomId>,
    },
}

/// Actions produced by the client for the caller to execute.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientAction {
    /// Open a physical transport to `server`.
    OpenTransport {
        /// Id to tag every signal from this transport with.
        connection: ConnectionId,
        /// Server base address.
        server: String,
    },
    /// Close the physical transport.
    CloseTransport {
        /// Connection to close.
        connection: ConnectionId,
    },
    /// Send a message on the open transport.
    Send(ClientMessage),
    /// Deliver a notification to registered listeners.
    Dispatch(Notification),
    /// A message arrived for a room that is not on screen.
    ShowLocalNotification {
        /// Room the message belongs to.
        room_id: RoomId,
        /// Message that arrived.
        message_id: MessageId,
    },
}

/// Notification delivered to UI listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// Server domain event, forwarded under its wire name.
    Server(ServerEvent),
    /// Connection state changed.
    StateChanged {
        /// State before the transition.
        previous: ConnectionState,
        /// State after the transition.
        current: ConnectionState,
    },
    /// The server rejected the bearer token. Terminal until a fresh
    /// `connect` with a new token.
    AuthRejected {
        /// Rejection reason, if the server gave one.
        reason: Option<String>,
    },
    /// Reconnection ceiling reached; the client stays disconnected.
    ReconnectExhausted {
        /// Retries made before giving up.
        attempts: u32,
    },
    /// A message arrived for a room that is not on screen. Drivers publish
    /// [`ClientAction::ShowLocalNotification`] as this notification.
    LocalNotification {
        /// Room the message belongs to.
        room_id: RoomId,
        /// Message that arrived.
        message_id: MessageId,
    },
}

impl Notification {
    /// Registry key this notification is dispatched under.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Server(event) => EventKind::from(event.name()),
            Self::StateChanged { .. } => EventKind::StateChanged,
            Self::AuthRejected { .. } => EventKind::AuthRejected,
            Self::ReconnectExhausted { .. } => EventKind::ReconnectExhausted,
            Self::LocalNotification { .. } => EventKind::LocalNotification,
        }
    }
}

/// Key under which listeners register.
///
/// Built-in server events and client lifecycle events have dedicated
/// variants; any other server event name maps to [`EventKind::Custom`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    /// `new_message`
    NewMessage,
    /// `presence`
    Presence,
    /// `typing`
    Typing,
    /// `messages_read`
    MessagesRead,
    /// `room_unlocked`
    RoomUnlocked,
    /// Any other server event name.
    Custom(String),
    /// `state_changed` (client lifecycle)
    StateChanged,
    /// `auth_rejected` (client lifecycle)
    AuthRejected,
    /// `reconnect_exhausted` (client lifecycle)
    ReconnectExhausted,
    /// `local_notification` (client lifecycle)
    LocalNotification,
}

const STATE_CHANGED: &str = "state_changed";
const AUTH_REJECTED: &str = "auth_rejected";
const RECONNECT_EXHAUSTED: &str = "reconnect_exhausted";
const LOCAL_NOTIFICATION: &str = "local_notification";

impl EventKind {
    /// Event name as used on the wire / in string-keyed registration.
    pub fn name(&self) -> &str {
        match self {
            Self::NewMessage => wire::NEW_MESSAGE,
            Self::Presence => wire::PRESENCE,
            Self::Typing => wire::TYPING,
            Self::MessagesRead => wire::MESSAGES_READ,
            Self::RoomUnlocked => wire::ROOM_UNLOCKED,
            Self::Custom(name) => name,
            Self::StateChanged => STATE_CHANGED,
            Self::AuthRejected => AUTH_REJECTED,
            Self::ReconnectExhausted => RECONNECT_EXHAUSTED,
            Self::LocalNotification => LOCAL_NOTIFICATION,
        }
    }
}

impl From<&str> for EventKind {
    fn from(name: &str) -> Self {
        match name {
            wire::NEW_MESSAGE => Self::NewMessage,
            wire::PRESENCE => Self::Presence,
            wire::TYPING => Self::Typing,
            wire::MESSAGES_READ => Self::MessagesRead,
            wire::ROOM_UNLOCKED => Self::RoomUnlocked,
            STATE_CHANGED => Self::StateChanged,
            AUTH_REJECTED => Self::AuthRejected,
            RECONNECT_EXHAUSTED => Self::ReconnectExhausted,
            LOCAL_NOTIFICATION => Self::LocalNotification,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
