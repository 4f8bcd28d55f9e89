//! Tether Protocol
//!
//! Wire-level types shared by the realtime client and its backend.
//!
//! # Messages
//!
//! - [`ClientMessage`]: outbound requests (authentication, room membership,
//!   typing and read receipts)
//! - [`ServerMessage`]: inbound authentication answers and named events
//!
//! # Events
//!
//! Named server events are lifted into [`ServerEvent`], a tagged union with an
//! explicit payload per known kind. Unknown or unparseable events are kept in
//! [`ServerEvent::Other`] so new server event types reach subscribers without
//! protocol changes.
//!
//! # Framing
//!
//! The duplex channel carries one JSON message per text frame. The long-poll
//! fallback carries JSON arrays of messages per request. See [`codec`].

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod codec;
mod error;
pub mod event;
mod ids;
mod message;

pub use codec::{
    decode_batch, decode_client, decode_server, decode_server_batch, encode_batch, encode_client,
    encode_server,
};
pub use error::ProtoError;
pub use event::{
    ChatMessage, PresenceChange, ReadReceipt, RoomUnlocked, ServerEvent, TypingIndicator,
};
pub use ids::{MessageId, RoomId, UserId};
pub use message::{ClientMessage, ServerMessage};
