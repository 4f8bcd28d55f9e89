//! Client state machine.
//!
//! The `Client` owns the connection lifecycle: it opens transports, runs the
//! authentication handshake once per physical connection, schedules
//! reconnection with bounded backoff, replays room membership after every
//! successful authentication, and gates interaction commands on the
//! authenticated state.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use tether_core::{Backoff, ConnectionState, Environment, ReconnectPolicy};
use tether_proto::{ClientMessage, MessageId, RoomId, ServerEvent, ServerMessage};
use tracing::{debug, info, warn};
use url::Url;

use crate::{
    error::ClientError,
    event::{ClientAction, ClientEvent, ConnectionId, Notification},
    rooms::RoomMembership,
};

/// Default time allowed between transport open and the authentication answer.
const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(10);

/// Client configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientConfig {
    /// Reconnection backoff policy.
    pub reconnect: ReconnectPolicy,
    /// How long to wait for `authenticated`/`unauthorized` after the
    /// transport opens before treating the attempt as failed.
    pub auth_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self { reconnect: ReconnectPolicy::default(), auth_timeout: DEFAULT_AUTH_TIMEOUT }
    }
}

/// Server address and token held for the current connect cycle.
#[derive(Debug, Clone)]
struct Session {
    server: String,
    token: SecretString,
}

/// Client state machine.
///
/// Pure state machine - returns actions, caller handles I/O and delivers
/// [`ClientEvent::Tick`] at [`Client::next_deadline`].
///
/// # Type Parameters
///
/// - `E`: Environment implementation for time
pub struct Client<E: Environment> {
    /// Environment for time.
    env: E,

    config: ClientConfig,

    state: ConnectionState,

    /// Present from `connect` until `disconnect`, rejection, or exhaustion.
    session: Option<Session>,

    /// Current physical connection, if one is open or opening.
    connection: Option<ConnectionId>,

    next_connection_id: u64,

    backoff: Backoff,

    /// Single pending reconnection deadline.
    reconnect_at: Option<E::Instant>,

    /// Authentication handshake deadline for the current connection.
    auth_deadline: Option<E::Instant>,

    rooms: RoomMembership,

    /// Room currently on screen (advisory).
    active_room: Option<RoomId>,
}

impl<E: Environment> Client<E> {
    /// Create a disconnected client.
    pub fn new(env: E, config: ClientConfig) -> Self {
        Self {
            env,
            config,
            state: ConnectionState::Disconnected,
            session: None,
            connection: None,
            next_connection_id: 0,
            backoff: Backoff::new(config.reconnect),
            reconnect_at: None,
            auth_deadline: None,
            rooms: RoomMembership::new(),
            active_room: None,
        }
    }

    /// Client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// `true` only while authenticated.
    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    /// Room currently on screen.
    pub fn current_room(&self) -> Option<&RoomId> {
        self.active_room.as_ref()
    }

    /// Joined rooms, in join order.
    pub fn rooms(&self) -> &RoomMembership {
        &self.rooms
    }

    /// Check if the client is a member of a room.
    pub fn is_member(&self, room_id: &RoomId) -> bool {
        self.rooms.contains(room_id)
    }

    /// Retries scheduled since the last successful authentication.
    pub fn reconnect_attempts(&self) -> u32 {
        self.backoff.attempts()
    }

    /// `true` while a reconnection deadline is pending.
    pub fn has_pending_reconnect(&self) -> bool {
        self.reconnect_at.is_some()
    }

    /// Current physical connection id.
    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.connection
    }

    /// Earliest pending deadline, if any.
    ///
    /// The caller delivers [`ClientEvent::Tick`] once this instant is reached.
    pub fn next_deadline(&self) -> Option<E::Instant> {
        match (self.reconnect_at, self.auth_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Process an event and return resulting actions.
    ///
    /// # Errors
    ///
    /// Only [`ClientEvent::Connect`] can fail, when the server address or the
    /// token is unusable. The client state is unchanged in that case.
    pub fn handle(
        &mut self,
        event: ClientEvent<E::Instant>,
    ) -> Result<Vec<ClientAction>, ClientError> {
        let actions = match event {
            ClientEvent::Connect { server, token } => return self.handle_connect(server, token),
            ClientEvent::Disconnect => self.handle_disconnect(),
            ClientEvent::TransportOpened { connection } => self.handle_opened(connection),
            ClientEvent::TransportClosed { connection, reason } => {
                self.handle_transport_lost(connection, &reason, false)
            },
            ClientEvent::TransportError { connection, reason } => {
                self.handle_transport_lost(connection, &reason, true)
            },
            ClientEvent::MessageReceived { connection, message } => {
                self.handle_message(connection, message)
            },
            ClientEvent::Tick { now } => self.handle_tick(now),
            ClientEvent::JoinRoom { room_id } => self.handle_join_room(room_id),
            ClientEvent::LeaveRoom { room_id } => self.handle_leave_room(&room_id),
            ClientEvent::StartTyping { room_id } => {
                self.command(ClientMessage::TypingStart { room_id })
            },
            ClientEvent::StopTyping { room_id } => {
                self.command(ClientMessage::TypingStop { room_id })
            },
            ClientEvent::MarkRead { message_id, room_id } => {
                self.command(ClientMessage::MarkRead { message_id, room_id })
            },
            ClientEvent::SetActiveRoom { room_id } => {
                self.active_room = room_id;
                Vec::new()
            },
        };

        Ok(actions)
    }

    fn handle_connect(
        &mut self,
        server: String,
        token: SecretString,
    ) -> Result<Vec<ClientAction>, ClientError> {
        validate_address(&server)?;
        if token.expose_secret().is_empty() {
            return Err(ClientError::MissingToken);
        }

        match self.state {
            ConnectionState::Connecting
            | ConnectionState::ConnectedUnauthenticated
            | ConnectionState::Authenticated => {
                debug!(state = %self.state, "connect ignored, connection already in progress");
                return Ok(Vec::new());
            },
            ConnectionState::Disconnected | ConnectionState::Reconnecting => {},
        }

        info!(%server, "connecting");
        self.reconnect_at = None;
        self.backoff.reset();
        self.session = Some(Session { server, token });

        Ok(self.open_transport())
    }

    fn handle_disconnect(&mut self) -> Vec<ClientAction> {
        let mut actions = Vec::new();

        if let Some(connection) = self.connection.take() {
            actions.push(ClientAction::CloseTransport { connection });
        }

        self.reconnect_at = None;
        self.auth_deadline = None;
        self.backoff.reset();
        self.session = None;
        self.active_room = None;
        let left = self.rooms.clear();

        if self.state != ConnectionState::Disconnected {
            info!(rooms = left, "disconnected by caller");
        }
        self.transition(ConnectionState::Disconnected, &mut actions);

        actions
    }

    fn handle_opened(&mut self, connection: ConnectionId) -> Vec<ClientAction> {
        if !self.is_current(connection) || self.state != ConnectionState::Connecting {
            debug!(%connection, state = %self.state, "ignoring open signal");
            return Vec::new();
        }

        let Some(session) = &self.session else {
            return Vec::new();
        };

        let mut actions = vec![ClientAction::Send(ClientMessage::Authenticate {
            token: session.token.expose_secret().clone(),
        })];

        self.auth_deadline = Some(self.env.now() + self.config.auth_timeout);
        self.transition(ConnectionState::ConnectedUnauthenticated, &mut actions);

        actions
    }

    fn handle_transport_lost(
        &mut self,
        connection: ConnectionId,
        reason: &str,
        failed: bool,
    ) -> Vec<ClientAction> {
        if !self.is_current(connection) {
            debug!(%connection, "ignoring signal from stale connection");
            return Vec::new();
        }

        let mut actions = Vec::new();
        self.connection = None;
        self.auth_deadline = None;

        if failed {
            actions.push(ClientAction::CloseTransport { connection });
        }

        info!(%connection, state = %self.state, reason, "transport lost");
        self.schedule_reconnect(&mut actions);

        actions
    }

    fn handle_message(
        &mut self,
        connection: ConnectionId,
        message: ServerMessage,
    ) -> Vec<ClientAction> {
        if !self.is_current(connection) {
            debug!(%connection, "ignoring message from stale connection");
            return Vec::new();
        }

        match message {
            ServerMessage::Authenticated => self.handle_authenticated(),
            ServerMessage::Unauthorized { reason } => self.handle_unauthorized(reason),
            ServerMessage::Event { name, payload } => {
                if self.state != ConnectionState::Authenticated {
                    debug!(event = %name, state = %self.state, "dropping event before authentication");
                    return Vec::new();
                }
                self.route_event(ServerEvent::from_wire(&name, payload))
            },
        }
    }

    fn handle_authenticated(&mut self) -> Vec<ClientAction> {
        if self.state != ConnectionState::ConnectedUnauthenticated {
            debug!(state = %self.state, "unexpected authentication ack");
            return Vec::new();
        }

        let mut actions = Vec::new();
        self.auth_deadline = None;
        self.backoff.reset();
        self.transition(ConnectionState::Authenticated, &mut actions);

        info!(rooms = self.rooms.len(), "authenticated");
        actions.extend(
            self.rooms
                .iter()
                .map(|room_id| ClientAction::Send(ClientMessage::JoinRoom { room_id: room_id.clone() })),
        );

        actions
    }

    fn handle_unauthorized(&mut self, reason: Option<String>) -> Vec<ClientAction> {
        if !self.state.is_transport_open() {
            debug!(state = %self.state, "unexpected authentication rejection");
            return Vec::new();
        }

        warn!(reason = reason.as_deref().unwrap_or("none"), "authentication rejected");

        let mut actions = Vec::new();
        if let Some(connection) = self.connection.take() {
            actions.push(ClientAction::CloseTransport { connection });
        }

        self.auth_deadline = None;
        self.reconnect_at = None;
        self.session = None;
        self.transition(ConnectionState::Disconnected, &mut actions);
        actions.push(ClientAction::Dispatch(Notification::AuthRejected { reason }));

        actions
    }

    fn route_event(&self, event: ServerEvent) -> Vec<ClientAction> {
        let mut actions = Vec::new();

        if let ServerEvent::NewMessage(message) = &event {
            if self.active_room.as_ref() != Some(&message.room_id) {
                actions.push(ClientAction::ShowLocalNotification {
                    room_id: message.room_id.clone(),
                    message_id: message.id.clone(),
                });
            }
        }

        actions.push(ClientAction::Dispatch(Notification::Server(event)));
        actions
    }

    fn handle_tick(&mut self, now: E::Instant) -> Vec<ClientAction> {
        let mut actions = Vec::new();

        if self.auth_deadline.is_some_and(|deadline| now >= deadline) {
            self.auth_deadline = None;
            if let Some(connection) = self.connection.take() {
                warn!(%connection, "authentication timed out");
                actions.push(ClientAction::CloseTransport { connection });
                self.schedule_reconnect(&mut actions);
            }
        }

        if self.reconnect_at.is_some_and(|deadline| now >= deadline) {
            self.reconnect_at = None;
            if self.state == ConnectionState::Reconnecting {
                debug!(attempt = self.backoff.attempts(), "reconnect deadline reached");
                actions.extend(self.open_transport());
            }
        }

        actions
    }

    fn handle_join_room(&mut self, room_id: RoomId) -> Vec<ClientAction> {
        if !self.rooms.insert(room_id.clone()) {
            return Vec::new();
        }

        if self.state.is_connected() {
            vec![ClientAction::Send(ClientMessage::JoinRoom { room_id })]
        } else {
            debug!(%room_id, state = %self.state, "join deferred until authenticated");
            Vec::new()
        }
    }

    fn handle_leave_room(&mut self, room_id: &RoomId) -> Vec<ClientAction> {
        if !self.rooms.remove(room_id) {
            return Vec::new();
        }

        if self.state.is_connected() {
            vec![ClientAction::Send(ClientMessage::LeaveRoom { room_id: room_id.clone() })]
        } else {
            Vec::new()
        }
    }

    /// Best-effort outbound command, dropped unless authenticated.
    fn command(&self, message: ClientMessage) -> Vec<ClientAction> {
        if self.state.is_connected() {
            vec![ClientAction::Send(message)]
        } else {
            debug!(command = message.kind(), state = %self.state, "dropping command");
            Vec::new()
        }
    }

    /// Start a new physical connection for the held session.
    fn open_transport(&mut self) -> Vec<ClientAction> {
        let Some(server) = self.session.as_ref().map(|session| session.server.clone()) else {
            return Vec::new();
        };

        self.next_connection_id += 1;
        let connection = ConnectionId::new(self.next_connection_id);
        self.connection = Some(connection);

        let mut actions = vec![ClientAction::OpenTransport { connection, server }];
        self.transition(ConnectionState::Connecting, &mut actions);

        actions
    }

    /// Arm the reconnection deadline, or give up once the ceiling is reached.
    fn schedule_reconnect(&mut self, actions: &mut Vec<ClientAction>) {
        if self.session.is_none() {
            self.transition(ConnectionState::Disconnected, actions);
            return;
        }

        match self.backoff.next_delay() {
            Some(delay) => {
                debug!(?delay, attempt = self.backoff.attempts(), "reconnect scheduled");
                self.reconnect_at = Some(self.env.now() + delay);
                self.transition(ConnectionState::Reconnecting, actions);
            },
            None => {
                let attempts = self.backoff.attempts();
                warn!(attempts, "reconnection attempts exhausted");
                self.reconnect_at = None;
                self.session = None;
                self.transition(ConnectionState::Disconnected, actions);
                actions.push(ClientAction::Dispatch(Notification::ReconnectExhausted { attempts }));
            },
        }
    }

    fn transition(&mut self, next: ConnectionState, actions: &mut Vec<ClientAction>) {
        if self.state == next {
            return;
        }

        let previous = self.state;
        self.state = next;
        debug!(%previous, current = %next, "state transition");
        actions.push(ClientAction::Dispatch(Notification::StateChanged { previous, current: next }));
    }

    fn is_current(&self, connection: ConnectionId) -> bool {
        self.connection == Some(connection)
    }
}

/// Check that `server` is a realtime endpoint the transports can reach.
///
/// Accepts `ws`, `wss`, `http` and `https` URLs with a host.
pub fn validate_address(server: &str) -> Result<(), ClientError> {
    let invalid = |reason: String| ClientError::InvalidAddress { address: server.to_string(), reason };

    let url = Url::parse(server).map_err(|e| invalid(e.to_string()))?;

    match url.scheme() {
        "ws" | "wss" | "http" | "https" => {},
        other => return Err(invalid(format!("unsupported scheme {other:?}"))),
    }

    if url.host_str().is_none_or(str::is_empty) {
        return Err(invalid("missing host".to_string()));
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::{
        future::Future,
        sync::{
            Arc,
            atomic::{AtomicU64, Ordering},
        },
        time::Instant,
    };

    use serde_json::json;

    use super::*;

    const SERVER: &str = "wss://chat.example.com/realtime";

    #[derive(Clone)]
    struct TestEnv {
        origin: Instant,
        offset_ms: Arc<AtomicU64>,
    }

    impl TestEnv {
        fn new() -> Self {
            Self { origin: Instant::now(), offset_ms: Arc::new(AtomicU64::new(0)) }
        }

        fn advance(&self, by: Duration) -> Instant {
            let ms = u64::try_from(by.as_millis()).unwrap();
            self.offset_ms.fetch_add(ms, Ordering::SeqCst);
            self.now()
        }
    }

    impl Environment for TestEnv {
        type Instant = Instant;

        fn now(&self) -> Self::Instant {
            self.origin + Duration::from_millis(self.offset_ms.load(Ordering::SeqCst))
        }

        fn sleep(&self, _duration: Duration) -> impl Future<Output = ()> + Send {
            std::future::ready(())
        }
    }

    fn client() -> (Client<TestEnv>, TestEnv) {
        let env = TestEnv::new();
        (Client::new(env.clone(), ClientConfig::default()), env)
    }

    fn connect_event(token: &str) -> ClientEvent<Instant> {
        ClientEvent::Connect {
            server: SERVER.to_string(),
            token: SecretString::new(token.to_string()),
        }
    }

    fn opened_connection(actions: &[ClientAction]) -> ConnectionId {
        actions
            .iter()
            .find_map(|action| match action {
                ClientAction::OpenTransport { connection, .. } => Some(*connection),
                _ => None,
            })
            .unwrap()
    }

    fn notifications(actions: &[ClientAction]) -> Vec<&Notification> {
        actions
            .iter()
            .filter_map(|action| match action {
                ClientAction::Dispatch(notification) => Some(notification),
                _ => None,
            })
            .collect()
    }

    fn sent(actions: &[ClientAction]) -> Vec<&ClientMessage> {
        actions
            .iter()
            .filter_map(|action| match action {
                ClientAction::Send(message) => Some(message),
                _ => None,
            })
            .collect()
    }

    fn server(connection: ConnectionId, message: ServerMessage) -> ClientEvent<Instant> {
        ClientEvent::MessageReceived { connection, message }
    }

    /// Drive the client to `Authenticated` and return the connection id.
    fn authenticate(client: &mut Client<TestEnv>) -> ConnectionId {
        let actions = client.handle(connect_event("good-token")).unwrap();
        let connection = opened_connection(&actions);
        complete_handshake(client, connection);
        connection
    }

    fn complete_handshake(client: &mut Client<TestEnv>, connection: ConnectionId) -> Vec<ClientAction> {
        client.handle(ClientEvent::TransportOpened { connection }).unwrap();
        client.handle(server(connection, ServerMessage::Authenticated)).unwrap()
    }

    fn join(room: &str) -> ClientEvent<Instant> {
        ClientEvent::JoinRoom { room_id: RoomId::new(room) }
    }

    fn close(connection: ConnectionId) -> ClientEvent<Instant> {
        ClientEvent::TransportClosed { connection, reason: "network lost".to_string() }
    }

    #[test]
    fn new_client_is_disconnected() {
        let (client, _) = client();
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(!client.is_connected());
        assert_eq!(client.current_room(), None);
        assert_eq!(client.next_deadline(), None);
    }

    #[test]
    fn connect_opens_transport() {
        let (mut client, _) = client();
        let actions = client.handle(connect_event("t")).unwrap();

        assert_eq!(
            actions[0],
            ClientAction::OpenTransport { connection: ConnectionId::new(1), server: SERVER.to_string() }
        );
        assert_eq!(client.state(), ConnectionState::Connecting);
    }

    #[test]
    fn connect_rejects_bad_address() {
        let (mut client, _) = client();

        for address in ["not a url", "ftp://host/x", "file:///tmp/sock"] {
            let result = client.handle(ClientEvent::Connect {
                server: address.to_string(),
                token: SecretString::new("t".to_string()),
            });
            assert!(matches!(result, Err(ClientError::InvalidAddress { .. })), "{address}");
        }
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn connect_rejects_empty_token() {
        let (mut client, _) = client();
        let result = client.handle(connect_event(""));
        assert!(matches!(result, Err(ClientError::MissingToken)));
    }

    #[test]
    fn connect_is_idempotent_while_connecting_or_connected() {
        let (mut client, _) = client();
        let actions = client.handle(connect_event("t")).unwrap();
        let connection = opened_connection(&actions);

        assert!(client.handle(connect_event("t")).unwrap().is_empty());

        client.handle(ClientEvent::TransportOpened { connection }).unwrap();
        assert!(client.handle(connect_event("t")).unwrap().is_empty());

        client.handle(server(connection, ServerMessage::Authenticated)).unwrap();
        assert!(client.handle(connect_event("t")).unwrap().is_empty());
        assert_eq!(client.connection_id(), Some(connection));
    }

    #[test]
    fn open_sends_token_and_arms_auth_deadline() {
        let (mut client, env) = client();
        let actions = client.handle(connect_event("secret-token")).unwrap();
        let connection = opened_connection(&actions);

        let actions = client.handle(ClientEvent::TransportOpened { connection }).unwrap();

        assert_eq!(
            sent(&actions),
            vec![&ClientMessage::Authenticate { token: "secret-token".to_string() }]
        );
        assert_eq!(client.state(), ConnectionState::ConnectedUnauthenticated);
        assert_eq!(client.next_deadline(), Some(env.now() + Duration::from_secs(10)));
    }

    #[test]
    fn authenticated_publishes_state_changes() {
        let (mut client, _) = client();
        let actions = client.handle(connect_event("t")).unwrap();
        let connection = opened_connection(&actions);
        let actions = complete_handshake(&mut client, connection);

        assert!(client.is_connected());
        assert_eq!(client.next_deadline(), None);
        assert_eq!(
            notifications(&actions),
            vec![&Notification::StateChanged {
                previous: ConnectionState::ConnectedUnauthenticated,
                current: ConnectionState::Authenticated,
            }]
        );
    }

    #[test]
    fn rejected_token_disconnects_without_retry() {
        let (mut client, _) = client();
        let actions = client.handle(connect_event("bad-token")).unwrap();
        let connection = opened_connection(&actions);
        client.handle(ClientEvent::TransportOpened { connection }).unwrap();

        let actions = client
            .handle(server(connection, ServerMessage::Unauthorized { reason: Some("expired".to_string()) }))
            .unwrap();

        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(!client.is_connected());
        assert!(!client.has_pending_reconnect());
        assert_eq!(client.next_deadline(), None);
        assert!(actions.contains(&ClientAction::CloseTransport { connection }));

        let rejections = notifications(&actions)
            .into_iter()
            .filter(|n| matches!(n, Notification::AuthRejected { .. }))
            .count();
        assert_eq!(rejections, 1);

        // The late close of the rejected socket must not start a retry.
        let actions = client.handle(close(connection)).unwrap();
        assert!(actions.is_empty());
        assert!(!client.has_pending_reconnect());
    }

    #[test]
    fn duplicate_join_sends_once() {
        let (mut client, _) = client();
        authenticate(&mut client);

        let first = client.handle(join("m1")).unwrap();
        let second = client.handle(join("m1")).unwrap();

        assert_eq!(sent(&first), vec![&ClientMessage::JoinRoom { room_id: RoomId::new("m1") }]);
        assert!(second.is_empty());
        assert_eq!(client.rooms().len(), 1);
    }

    #[test]
    fn join_before_authentication_is_deferred() {
        let (mut client, _) = client();
        assert!(client.handle(join("m1")).unwrap().is_empty());

        let actions = client.handle(connect_event("t")).unwrap();
        let connection = opened_connection(&actions);
        let actions = complete_handshake(&mut client, connection);

        assert_eq!(sent(&actions), vec![&ClientMessage::JoinRoom { room_id: RoomId::new("m1") }]);
    }

    #[test]
    fn leave_while_offline_is_local_only() {
        let (mut client, _) = client();
        client.handle(join("m1")).unwrap();

        let actions = client.handle(ClientEvent::LeaveRoom { room_id: RoomId::new("m1") }).unwrap();

        assert!(actions.is_empty());
        assert!(!client.is_member(&RoomId::new("m1")));

        // Leaving a room we are not in is a no-op.
        let actions = client.handle(ClientEvent::LeaveRoom { room_id: RoomId::new("m9") }).unwrap();
        assert!(actions.is_empty());
    }

    #[test]
    fn leave_while_connected_sends_request() {
        let (mut client, _) = client();
        authenticate(&mut client);
        client.handle(join("m1")).unwrap();

        let actions = client.handle(ClientEvent::LeaveRoom { room_id: RoomId::new("m1") }).unwrap();
        assert_eq!(sent(&actions), vec![&ClientMessage::LeaveRoom { room_id: RoomId::new("m1") }]);
    }

    #[test]
    fn close_while_authenticated_replays_rooms_in_join_order() {
        let (mut client, env) = client();
        let connection = authenticate(&mut client);
        client.handle(join("m1")).unwrap();
        client.handle(join("m2")).unwrap();

        let actions = client.handle(close(connection)).unwrap();
        assert_eq!(client.state(), ConnectionState::Reconnecting);
        assert!(sent(&actions).is_empty());

        let deadline = client.next_deadline().unwrap();
        assert_eq!(deadline, env.now() + Duration::from_secs(1));

        let now = env.advance(Duration::from_secs(1));
        let actions = client.handle(ClientEvent::Tick { now }).unwrap();
        let next = opened_connection(&actions);
        assert_ne!(next, connection);

        let actions = complete_handshake(&mut client, next);
        assert_eq!(
            sent(&actions),
            vec![
                &ClientMessage::JoinRoom { room_id: RoomId::new("m1") },
                &ClientMessage::JoinRoom { room_id: RoomId::new("m2") },
            ]
        );
        assert_eq!(client.reconnect_attempts(), 0);
    }

    #[test]
    fn tick_before_deadline_does_nothing() {
        let (mut client, env) = client();
        let connection = authenticate(&mut client);
        client.handle(close(connection)).unwrap();

        let now = env.advance(Duration::from_millis(999));
        assert!(client.handle(ClientEvent::Tick { now }).unwrap().is_empty());
        assert_eq!(client.state(), ConnectionState::Reconnecting);
    }

    #[test]
    fn backoff_doubles_until_exhausted() {
        let (mut client, env) = client();
        let mut connection = authenticate(&mut client);
        let mut delays = Vec::new();

        loop {
            let actions = client.handle(close(connection)).unwrap();
            let Some(deadline) = client.next_deadline() else {
                assert_eq!(
                    notifications(&actions).last(),
                    Some(&&Notification::ReconnectExhausted { attempts: 5 })
                );
                break;
            };
            delays.push(deadline - env.now());

            let now = env.advance(deadline - env.now());
            let actions = client.handle(ClientEvent::Tick { now }).unwrap();
            connection = opened_connection(&actions);
        }

        assert_eq!(
            delays,
            [1, 2, 4, 8, 16].map(Duration::from_secs).to_vec(),
        );
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(!client.has_pending_reconnect());
    }

    #[test]
    fn connect_after_exhaustion_starts_fresh_cycle() {
        let (mut client, env) = client();
        let mut connection = authenticate(&mut client);

        loop {
            client.handle(close(connection)).unwrap();
            let Some(deadline) = client.next_deadline() else { break };
            let now = env.advance(deadline - env.now());
            connection = opened_connection(&client.handle(ClientEvent::Tick { now }).unwrap());
        }
        assert_eq!(client.state(), ConnectionState::Disconnected);

        let actions = client.handle(connect_event("t")).unwrap();
        let connection = opened_connection(&actions);
        assert_eq!(client.reconnect_attempts(), 0);

        client.handle(ClientEvent::TransportError { connection, reason: "refused".to_string() }).unwrap();
        assert_eq!(client.next_deadline(), Some(env.now() + Duration::from_secs(1)));
    }

    #[test]
    fn disconnect_cancels_pending_reconnect_and_clears_rooms() {
        let (mut client, env) = client();
        let connection = authenticate(&mut client);
        client.handle(join("m1")).unwrap();
        client.handle(ClientEvent::SetActiveRoom { room_id: Some(RoomId::new("m1")) }).unwrap();
        client.handle(close(connection)).unwrap();
        assert!(client.has_pending_reconnect());

        client.handle(ClientEvent::Disconnect).unwrap();

        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(!client.has_pending_reconnect());
        assert!(client.rooms().is_empty());
        assert_eq!(client.current_room(), None);

        let now = env.advance(Duration::from_secs(60));
        assert!(client.handle(ClientEvent::Tick { now }).unwrap().is_empty());
    }

    #[test]
    fn disconnect_closes_open_transport() {
        let (mut client, _) = client();
        let connection = authenticate(&mut client);

        let actions = client.handle(ClientEvent::Disconnect).unwrap();

        assert_eq!(actions[0], ClientAction::CloseTransport { connection });
        assert_eq!(client.connection_id(), None);

        // Signals from the torn-down socket are ignored.
        assert!(client.handle(close(connection)).unwrap().is_empty());
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn connect_while_reconnecting_cancels_timer() {
        let (mut client, _) = client();
        let connection = authenticate(&mut client);
        client.handle(close(connection)).unwrap();
        assert_eq!(client.reconnect_attempts(), 1);

        let actions = client.handle(connect_event("t")).unwrap();

        assert_eq!(client.state(), ConnectionState::Connecting);
        assert!(!client.has_pending_reconnect());
        assert_eq!(client.reconnect_attempts(), 0);
        assert_eq!(opened_connection(&actions), ConnectionId::new(2));
    }

    #[test]
    fn auth_timeout_is_transient() {
        let (mut client, env) = client();
        let actions = client.handle(connect_event("t")).unwrap();
        let connection = opened_connection(&actions);
        client.handle(ClientEvent::TransportOpened { connection }).unwrap();

        let now = env.advance(Duration::from_secs(10));
        let actions = client.handle(ClientEvent::Tick { now }).unwrap();

        assert!(actions.contains(&ClientAction::CloseTransport { connection }));
        assert_eq!(client.state(), ConnectionState::Reconnecting);
        assert_eq!(client.reconnect_attempts(), 1);
    }

    #[test]
    fn open_failure_schedules_retry() {
        let (mut client, _) = client();
        let actions = client.handle(connect_event("t")).unwrap();
        let connection = opened_connection(&actions);

        let actions = client
            .handle(ClientEvent::TransportError { connection, reason: "refused".to_string() })
            .unwrap();

        assert!(actions.contains(&ClientAction::CloseTransport { connection }));
        assert_eq!(client.state(), ConnectionState::Reconnecting);
    }

    #[test]
    fn commands_are_dropped_unless_authenticated() {
        let (mut client, _) = client();
        let room_id = RoomId::new("m1");

        let offline = [
            ClientEvent::StartTyping { room_id: room_id.clone() },
            ClientEvent::StopTyping { room_id: room_id.clone() },
            ClientEvent::MarkRead { message_id: MessageId::new("x1"), room_id: room_id.clone() },
        ];
        for event in offline {
            assert!(client.handle(event).unwrap().is_empty());
        }

        authenticate(&mut client);
        let actions = client.handle(ClientEvent::StartTyping { room_id: room_id.clone() }).unwrap();
        assert_eq!(sent(&actions), vec![&ClientMessage::TypingStart { room_id }]);
    }

    #[test]
    fn events_are_dispatched_with_local_notification_outside_active_room() {
        let (mut client, _) = client();
        let connection = authenticate(&mut client);
        client.handle(ClientEvent::SetActiveRoom { room_id: Some(RoomId::new("m1")) }).unwrap();
        assert_eq!(client.current_room(), Some(&RoomId::new("m1")));

        let message = |room: &str| {
            server(connection, ServerMessage::Event {
                name: "new_message".to_string(),
                payload: json!({"id": "x1", "room_id": room, "sender_id": "u2", "body": "hi"}),
            })
        };

        let in_view = client.handle(message("m1")).unwrap();
        assert_eq!(in_view.len(), 1);
        assert!(matches!(&in_view[0], ClientAction::Dispatch(Notification::Server(ServerEvent::NewMessage(_)))));

        let elsewhere = client.handle(message("m2")).unwrap();
        assert_eq!(
            elsewhere[0],
            ClientAction::ShowLocalNotification {
                room_id: RoomId::new("m2"),
                message_id: MessageId::new("x1"),
            }
        );
    }

    #[test]
    fn unknown_events_are_forwarded_verbatim() {
        let (mut client, _) = client();
        let connection = authenticate(&mut client);

        let actions = client
            .handle(server(connection, ServerMessage::Event {
                name: "shipment_updated".to_string(),
                payload: json!({"status": "delivered"}),
            }))
            .unwrap();

        assert_eq!(
            actions,
            vec![ClientAction::Dispatch(Notification::Server(ServerEvent::Other {
                name: "shipment_updated".to_string(),
                payload: json!({"status": "delivered"}),
            }))]
        );
    }

    #[test]
    fn stale_connection_signals_are_ignored() {
        let (mut client, _) = client();
        let first = authenticate(&mut client);
        client.handle(ClientEvent::Disconnect).unwrap();

        let actions = client.handle(connect_event("t")).unwrap();
        let second = opened_connection(&actions);
        assert_ne!(first, second);

        assert!(client.handle(ClientEvent::TransportOpened { connection: first }).unwrap().is_empty());
        assert!(client.handle(server(first, ServerMessage::Authenticated)).unwrap().is_empty());
        assert_eq!(client.state(), ConnectionState::Connecting);
    }
}
