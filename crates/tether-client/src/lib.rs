//! Tether Client
//!
//! Action-based realtime client state machine. Manages the connection
//! lifecycle, session authentication, reconnection backoff, room membership
//! and outbound interaction commands.
//!
//! # Architecture
//!
//! The client is a pure state machine that:
//! - Receives events from the caller (transport signals, inbound messages,
//!   clock ticks, application intents)
//! - Produces actions for the caller to execute (open/close the transport,
//!   send messages, dispatch notifications)
//! - Uses the `Environment` trait for time (deterministic testing)
//!
//! Timers are deadlines held by the client, not callbacks. The caller asks
//! [`Client::next_deadline`] when to deliver the next [`ClientEvent::Tick`].
//!
//! # Components
//!
//! - [`Client`]: Top-level connection state machine
//! - [`RoomMembership`]: Ordered set of joined rooms, replayed on reconnect
//! - [`EventRegistry`]: Listener table keyed by [`EventKind`]
//! - [`ClientEvent`]: Events fed into the client
//! - [`ClientAction`]: Actions produced by the client

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod client;
mod error;
mod event;
mod registry;
mod rooms;

pub use client::{Client, ClientConfig, validate_address};
pub use error::ClientError;
pub use event::{ClientAction, ClientEvent, ConnectionId, EventKind, Notification};
pub use registry::{
    DispatchGate, DispatchReport, DispatchTicket, EventRegistry, Listener, ListenerId, run_listeners,
};
pub use rooms::RoomMembership;
pub use secrecy::SecretString;
pub use tether_core::{ConnectionState, Environment, ReconnectPolicy};
pub use tether_proto::{MessageId, RoomId, ServerEvent, ServerMessage, UserId};
