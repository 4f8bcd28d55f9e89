//! Fuzz target for the [`Client`] state machine
//!
//! Feed arbitrary, out-of-order and stale inputs straight into the sans-IO
//! client: transport signals for old connection ids, acknowledgments that were
//! never asked for, ticks at random times.
//!
//! # Invariants
//!
//! - `Authenticated` ONLY reachable via an `authenticated` message on the
//!   current connection
//! - At most one `OpenTransport` per input
//! - A pending retry exists iff the state is `Reconnecting`
//! - Reconnect attempts never exceed the policy ceiling
//! - Non-authentication sends only leave the client `Authenticated`
//! - `Disconnect` always lands in `Disconnected` with no rooms and no deadline
//! - NEVER panic on unexpected input

#![no_main]

use std::{
    future::Future,
    ops::{Add, Sub},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use secrecy::SecretString;
use tether_client::{
    Client, ClientAction, ClientConfig, ClientEvent, ConnectionId, ConnectionState, Notification,
    ReconnectPolicy, RoomId, ServerMessage,
};
use tether_core::Environment;
use tether_proto::ClientMessage;

/// Represents time as Duration since epoch 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct FuzzInstant(Duration);

impl Add<Duration> for FuzzInstant {
    type Output = Self;

    fn add(self, rhs: Duration) -> Self {
        Self(self.0.saturating_add(rhs))
    }
}

impl Sub for FuzzInstant {
    type Output = Duration;

    fn sub(self, other: Self) -> Duration {
        self.0.saturating_sub(other.0)
    }
}

#[derive(Debug, Clone, Default)]
struct FuzzEnv {
    millis: Arc<AtomicU64>,
}

impl FuzzEnv {
    fn advance(&self, millis: u64) -> FuzzInstant {
        self.millis.fetch_add(millis, Ordering::SeqCst);
        self.now()
    }
}

impl Environment for FuzzEnv {
    type Instant = FuzzInstant;

    fn now(&self) -> FuzzInstant {
        FuzzInstant(Duration::from_millis(self.millis.load(Ordering::SeqCst)))
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send {
        self.advance(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX));
        std::future::ready(())
    }
}

#[derive(Debug, Clone, Arbitrary)]
enum FuzzEvent {
    Connect { token_len: u8, bad_address: bool },
    Disconnect,
    /// Signals reference the current connection id plus `skew` (mod 3), so
    /// stale and future ids show up regularly.
    Opened { skew: u8 },
    Closed { skew: u8 },
    Errored { skew: u8 },
    Authenticated { skew: u8 },
    Unauthorized { skew: u8 },
    Event { skew: u8, room: u8, known: bool },
    Tick { advance_ms: u16 },
    Join { room: u8 },
    Leave { room: u8 },
    Typing { room: u8 },
    MarkRead { room: u8 },
    ActiveRoom { room: Option<u8> },
}

#[derive(Debug, Clone, Arbitrary)]
struct FuzzInput {
    base_delay_ms: u16,
    exponent_cap: u8,
    max_attempts: u8,
    auth_timeout_ms: u16,
    events: Vec<FuzzEvent>,
}

fn room(raw: u8) -> RoomId {
    RoomId::new(format!("room-{}", raw % 8))
}

fn connection(client: &Client<FuzzEnv>, last: u64, skew: u8) -> ConnectionId {
    let base = client.connection_id().map_or(last, ConnectionId::get);
    ConnectionId::new(base.saturating_sub(1) + u64::from(skew % 3))
}

fuzz_target!(|input: FuzzInput| {
    let policy = ReconnectPolicy {
        base_delay: Duration::from_millis(u64::from(input.base_delay_ms % 5_000) + 1),
        exponent_cap: u32::from(input.exponent_cap % 8),
        max_attempts: u32::from(input.max_attempts % 8),
    };
    let config = ClientConfig {
        reconnect: policy,
        auth_timeout: Duration::from_millis(u64::from(input.auth_timeout_ms) + 1),
    };

    let env = FuzzEnv::default();
    let mut client = Client::new(env.clone(), config);
    let mut last_connection = 0;

    for event in input.events {
        let previous = client.state();
        let mut acknowledged = None;

        let event = match event {
            FuzzEvent::Connect { token_len, bad_address } => ClientEvent::Connect {
                server: if bad_address { "ftp://nowhere".to_string() } else { "wss://host/rt".to_string() },
                token: SecretString::new("t".repeat(usize::from(token_len % 4))),
            },
            FuzzEvent::Disconnect => ClientEvent::Disconnect,
            FuzzEvent::Opened { skew } => {
                ClientEvent::TransportOpened { connection: connection(&client, last_connection, skew) }
            },
            FuzzEvent::Closed { skew } => ClientEvent::TransportClosed {
                connection: connection(&client, last_connection, skew),
                reason: "fuzz".to_string(),
            },
            FuzzEvent::Errored { skew } => ClientEvent::TransportError {
                connection: connection(&client, last_connection, skew),
                reason: "fuzz".to_string(),
            },
            FuzzEvent::Authenticated { skew } => {
                let connection = connection(&client, last_connection, skew);
                acknowledged = Some(connection);
                ClientEvent::MessageReceived { connection, message: ServerMessage::Authenticated }
            },
            FuzzEvent::Unauthorized { skew } => ClientEvent::MessageReceived {
                connection: connection(&client, last_connection, skew),
                message: ServerMessage::Unauthorized { reason: None },
            },
            FuzzEvent::Event { skew, room: raw, known } => ClientEvent::MessageReceived {
                connection: connection(&client, last_connection, skew),
                message: ServerMessage::Event {
                    name: if known { "new_message".to_string() } else { format!("custom_{raw}") },
                    payload: serde_json::json!({
                        "id": format!("m{raw}"),
                        "room_id": room(raw).as_str(),
                        "sender_id": "u1",
                    }),
                },
            },
            FuzzEvent::Tick { advance_ms } => {
                ClientEvent::Tick { now: env.advance(u64::from(advance_ms)) }
            },
            FuzzEvent::Join { room: raw } => ClientEvent::JoinRoom { room_id: room(raw) },
            FuzzEvent::Leave { room: raw } => ClientEvent::LeaveRoom { room_id: room(raw) },
            FuzzEvent::Typing { room: raw } => ClientEvent::StartTyping { room_id: room(raw) },
            FuzzEvent::MarkRead { room: raw } => ClientEvent::MarkRead {
                message_id: format!("m{raw}").as_str().into(),
                room_id: room(raw),
            },
            FuzzEvent::ActiveRoom { room: raw } => {
                ClientEvent::SetActiveRoom { room_id: raw.map(room) }
            },
        };

        let is_disconnect = matches!(event, ClientEvent::Disconnect);
        let current_before = client.connection_id();

        let Ok(actions) = client.handle(event) else {
            assert_eq!(client.state(), previous, "rejected input must not change state");
            continue;
        };

        let opens = actions
            .iter()
            .filter(|action| matches!(action, ClientAction::OpenTransport { .. }))
            .count();
        assert!(opens <= 1, "opened {opens} transports for one input");

        for action in &actions {
            match action {
                ClientAction::OpenTransport { connection, .. } => {
                    assert!(connection.get() > last_connection, "connection ids must increase");
                    last_connection = connection.get();
                },
                ClientAction::Send(message) if !matches!(message, ClientMessage::Authenticate { .. }) => {
                    assert_eq!(client.state(), ConnectionState::Authenticated);
                },
                ClientAction::Dispatch(Notification::StateChanged { current, .. })
                    if *current == ConnectionState::Authenticated =>
                {
                    assert_eq!(previous, ConnectionState::ConnectedUnauthenticated);
                    assert!(acknowledged.is_some() && acknowledged == current_before);
                },
                _ => {},
            }
        }

        assert_eq!(client.has_pending_reconnect(), client.state() == ConnectionState::Reconnecting);
        assert!(client.reconnect_attempts() <= policy.max_attempts);

        if is_disconnect {
            assert_eq!(client.state(), ConnectionState::Disconnected);
            assert!(client.rooms().is_empty());
            assert_eq!(client.next_deadline(), None);
        }
    }
});
