//! In-process world: one sans-IO client wired to a simulated backend.
//!
//! Every action the client emits is executed synchronously against
//! [`SimBackend`]; backend replies and transport signals are fed back until the
//! system is quiescent. Time only moves through [`SimWorld::advance`].
//!
//! The backend checks the client's wire behavior as it goes and records
//! protocol violations (duplicate joins, commands before authentication,
//! sends without a transport) instead of panicking.

use std::{collections::VecDeque, time::Duration};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use secrecy::SecretString;
use tether_client::{
    Client, ClientAction, ClientConfig, ClientError, ClientEvent, ConnectionId, EventRegistry,
    MessageId, Notification, RoomId, ServerMessage,
};
use tether_core::env::Environment;
use tether_proto::ClientMessage;
use tracing::debug;

use crate::sim_env::{SimEnv, SimInstant};

/// Address the simulated client connects to.
pub const SIM_SERVER: &str = "wss://sim.tether.test/realtime";

/// Token the simulated backend accepts by default.
pub const VALID_TOKEN: &str = "valid-token";

/// Upper bound on ticks processed by one [`SimWorld::advance`] call.
const MAX_TICKS_PER_ADVANCE: usize = 64;

/// Wire payload of a `new_message` event from a remote user.
pub fn new_message_payload(message_id: &str, room_id: &str) -> serde_json::Value {
    serde_json::json!({
        "id": message_id,
        "room_id": room_id,
        "sender_id": "u-remote",
        "body": "hello",
    })
}

/// Simulated backend.
#[derive(Debug)]
pub struct SimBackend {
    valid_tokens: Vec<String>,
    network_up: bool,
    open_failure_rate: f64,
    rng: ChaCha8Rng,
    connection: Option<ConnectionId>,
    authenticated: bool,
    members: Vec<RoomId>,
    received: Vec<(ConnectionId, ClientMessage)>,
    violations: Vec<String>,
    opens: usize,
}

impl SimBackend {
    fn new(seed: u64) -> Self {
        Self {
            valid_tokens: vec![VALID_TOKEN.to_string()],
            network_up: true,
            open_failure_rate: 0.0,
            rng: ChaCha8Rng::seed_from_u64(seed),
            connection: None,
            authenticated: false,
            members: Vec::new(),
            received: Vec::new(),
            violations: Vec::new(),
            opens: 0,
        }
    }

    /// Connection the backend currently holds open.
    pub fn connection(&self) -> Option<ConnectionId> {
        self.connection
    }

    /// `true` once the live connection presented a valid token.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Rooms the live connection has joined, in join order.
    pub fn members(&self) -> &[RoomId] {
        &self.members
    }

    /// Every message received, tagged with its connection.
    pub fn received(&self) -> &[(ConnectionId, ClientMessage)] {
        &self.received
    }

    /// Messages received on one connection.
    pub fn received_on(&self, connection: ConnectionId) -> Vec<&ClientMessage> {
        self.received.iter().filter(|(c, _)| *c == connection).map(|(_, m)| m).collect()
    }

    /// Protocol violations observed so far.
    pub fn violations(&self) -> &[String] {
        &self.violations
    }

    /// Transport open attempts seen.
    pub fn opens(&self) -> usize {
        self.opens
    }

    fn open(&mut self, connection: ConnectionId) -> bool {
        self.opens += 1;

        let flaky = self.open_failure_rate > 0.0 && self.rng.gen_bool(self.open_failure_rate);
        if !self.network_up || flaky {
            return false;
        }

        if let Some(previous) = self.connection.replace(connection) {
            self.violations.push(format!("{connection} opened while {previous} still open"));
        }
        self.authenticated = false;
        self.members.clear();
        true
    }

    fn close(&mut self, connection: ConnectionId) {
        if self.connection == Some(connection) {
            self.connection = None;
            self.authenticated = false;
            self.members.clear();
        }
    }

    fn receive(
        &mut self,
        connection: Option<ConnectionId>,
        message: ClientMessage,
    ) -> Option<(ConnectionId, ServerMessage)> {
        let Some(connection) = connection.filter(|c| self.connection == Some(*c)) else {
            self.violations.push(format!("{} sent without an open transport", message.kind()));
            return None;
        };

        self.received.push((connection, message.clone()));

        if !self.authenticated && !matches!(message, ClientMessage::Authenticate { .. }) {
            self.violations.push(format!("{} sent before authentication", message.kind()));
        }

        match message {
            ClientMessage::Authenticate { token } => {
                let reply = if self.valid_tokens.contains(&token) {
                    self.authenticated = true;
                    ServerMessage::Authenticated
                } else {
                    ServerMessage::Unauthorized { reason: Some("invalid token".to_string()) }
                };
                Some((connection, reply))
            },
            ClientMessage::JoinRoom { room_id } => {
                if self.members.contains(&room_id) {
                    self.violations.push(format!("duplicate join for {room_id}"));
                } else {
                    self.members.push(room_id);
                }
                None
            },
            ClientMessage::LeaveRoom { room_id } => {
                let before = self.members.len();
                self.members.retain(|member| *member != room_id);
                if self.members.len() == before {
                    self.violations.push(format!("leave for unjoined {room_id}"));
                }
                None
            },
            ClientMessage::TypingStart { .. }
            | ClientMessage::TypingStop { .. }
            | ClientMessage::MarkRead { .. } => None,
        }
    }
}

/// Client plus backend plus listener registry, driven step by step.
pub struct SimWorld {
    env: SimEnv,
    client: Client<SimEnv>,
    backend: SimBackend,
    registry: EventRegistry,
    notifications: Vec<Notification>,
    local_notifications: Vec<(RoomId, MessageId)>,
}

impl SimWorld {
    /// World with default client configuration and seed 0.
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default(), 0)
    }

    /// World with explicit configuration and RNG seed.
    pub fn with_config(config: ClientConfig, seed: u64) -> Self {
        let env = SimEnv::new();
        let client = Client::new(env.clone(), config);

        Self {
            env,
            client,
            backend: SimBackend::new(seed),
            registry: EventRegistry::new(),
            notifications: Vec::new(),
            local_notifications: Vec::new(),
        }
    }

    /// The client under test.
    pub fn client(&self) -> &Client<SimEnv> {
        &self.client
    }

    /// The simulated backend.
    pub fn backend(&self) -> &SimBackend {
        &self.backend
    }

    /// Listener registry notifications are dispatched through.
    pub fn registry_mut(&mut self) -> &mut EventRegistry {
        &mut self.registry
    }

    /// Every notification dispatched so far.
    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    /// Local notifications requested so far.
    pub fn local_notifications(&self) -> &[(RoomId, MessageId)] {
        &self.local_notifications
    }

    /// Current virtual time.
    pub fn now(&self) -> SimInstant {
        self.env.now()
    }

    /// Take the network down or bring it back. Open connections are not
    /// affected; only new opens fail.
    pub fn set_network(&mut self, up: bool) {
        self.backend.network_up = up;
    }

    /// Probability that any single open attempt fails.
    pub fn set_open_failure_rate(&mut self, rate: f64) {
        self.backend.open_failure_rate = rate.clamp(0.0, 1.0);
    }

    /// Call `connect` with `token`.
    pub fn connect(&mut self, token: &str) -> Result<(), ClientError> {
        self.feed(ClientEvent::Connect {
            server: SIM_SERVER.to_string(),
            token: SecretString::new(token.to_string()),
        })
    }

    /// Call `disconnect`.
    pub fn disconnect(&mut self) {
        self.feed_infallible(ClientEvent::Disconnect);
    }

    /// Join a room.
    pub fn join(&mut self, room: &str) {
        self.feed_infallible(ClientEvent::JoinRoom { room_id: RoomId::new(room) });
    }

    /// Leave a room.
    pub fn leave(&mut self, room: &str) {
        self.feed_infallible(ClientEvent::LeaveRoom { room_id: RoomId::new(room) });
    }

    /// Signal typing in a room.
    pub fn start_typing(&mut self, room: &str) {
        self.feed_infallible(ClientEvent::StartTyping { room_id: RoomId::new(room) });
    }

    /// Acknowledge a message.
    pub fn mark_read(&mut self, message: &str, room: &str) {
        self.feed_infallible(ClientEvent::MarkRead {
            message_id: MessageId::new(message),
            room_id: RoomId::new(room),
        });
    }

    /// Set the room on screen.
    pub fn set_active_room(&mut self, room: Option<&str>) {
        self.feed_infallible(ClientEvent::SetActiveRoom { room_id: room.map(RoomId::new) });
    }

    /// The server closes the live transport.
    pub fn drop_transport(&mut self) {
        if let Some(connection) = self.live_connection() {
            self.backend.close(connection);
            self.feed_infallible(ClientEvent::TransportClosed {
                connection,
                reason: "dropped by simulation".to_string(),
            });
        }
    }

    /// The live transport fails with an I/O error.
    pub fn fail_transport(&mut self) {
        if let Some(connection) = self.live_connection() {
            self.backend.close(connection);
            self.feed_infallible(ClientEvent::TransportError {
                connection,
                reason: "reset by simulation".to_string(),
            });
        }
    }

    /// The server pushes a named event on the live, authenticated transport.
    ///
    /// Returns `false` when there is no such transport.
    pub fn push_event(&mut self, name: &str, payload: serde_json::Value) -> bool {
        let Some(connection) = self.live_connection().filter(|_| self.backend.authenticated) else {
            return false;
        };

        self.feed_infallible(ClientEvent::MessageReceived {
            connection,
            message: ServerMessage::Event { name: name.to_string(), payload },
        });
        true
    }

    /// Deliver a raw server message on the live transport.
    pub fn deliver(&mut self, message: ServerMessage) {
        if let Some(connection) = self.live_connection() {
            self.feed_infallible(ClientEvent::MessageReceived { connection, message });
        }
    }

    /// Advance the clock and fire every deadline that falls due.
    pub fn advance(&mut self, by: Duration) {
        let now = self.env.advance(by);

        for _ in 0..MAX_TICKS_PER_ADVANCE {
            match self.client.next_deadline() {
                Some(deadline) if deadline <= now => {
                    self.feed_infallible(ClientEvent::Tick { now });
                },
                _ => break,
            }
        }
    }

    /// Jump to each pending deadline in turn until none is left.
    ///
    /// Returns the number of deadlines fired.
    pub fn run_until_idle(&mut self, limit: usize) -> usize {
        let mut fired = 0;

        while fired < limit {
            let Some(deadline) = self.client.next_deadline() else {
                break;
            };
            let now = self.env.advance_to(deadline);
            self.feed_infallible(ClientEvent::Tick { now });
            fired += 1;
        }

        fired
    }

    /// Feed one event and everything it causes.
    pub fn feed(&mut self, event: ClientEvent<SimInstant>) -> Result<(), ClientError> {
        let mut queue = VecDeque::from([event]);

        while let Some(event) = queue.pop_front() {
            for action in self.client.handle(event)? {
                if let Some(follow_up) = self.execute(action) {
                    queue.push_back(follow_up);
                }
            }
        }

        Ok(())
    }

    fn feed_infallible(&mut self, event: ClientEvent<SimInstant>) {
        if let Err(err) = self.feed(event) {
            debug!(%err, "simulation input rejected");
        }
    }

    fn live_connection(&self) -> Option<ConnectionId> {
        self.backend.connection.filter(|c| self.client.connection_id() == Some(*c))
    }

    fn execute(&mut self, action: ClientAction) -> Option<ClientEvent<SimInstant>> {
        match action {
            ClientAction::OpenTransport { connection, .. } => {
                if self.backend.open(connection) {
                    Some(ClientEvent::TransportOpened { connection })
                } else {
                    Some(ClientEvent::TransportError {
                        connection,
                        reason: "unreachable".to_string(),
                    })
                }
            },
            ClientAction::CloseTransport { connection } => {
                self.backend.close(connection);
                None
            },
            ClientAction::Send(message) => self
                .backend
                .receive(self.client.connection_id(), message)
                .map(|(connection, message)| ClientEvent::MessageReceived { connection, message }),
            ClientAction::Dispatch(notification) => {
                self.registry.dispatch(&notification);
                self.notifications.push(notification);
                None
            },
            ClientAction::ShowLocalNotification { room_id, message_id } => {
                self.local_notifications.push((room_id, message_id));
                None
            },
        }
    }
}

impl Default for SimWorld {
    fn default() -> Self {
        Self::new()
    }
}
