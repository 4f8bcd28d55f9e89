//! Tether production runtime.
//!
//! Drives the sans-IO [`tether_client::Client`] on Tokio:
//! - `SystemEnv` for the clock
//! - websocket transport with a long-polling fallback
//! - one worker task owning the client and the live channel
//!
//! ## Architecture
//!
//! ```text
//! RealtimeHandle (cloneable, non-blocking)
//!   └─ command queue ─> Worker
//!                        ├─ Client<SystemEnv>   (state machine)
//!                        ├─ Channel             (websocket | long-poll)
//!                        └─ EventRegistry       (shared with handles)
//! ```
//!
//! The application root owns the [`RealtimeService`]; UI components hold
//! [`RealtimeHandle`] clones.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod system_env;
pub mod transport;
mod worker;

use std::{sync::Arc, time::Duration};

pub use error::{RuntimeError, TransportError};
use secrecy::{ExposeSecret, SecretString};
pub use system_env::SystemEnv;
use tether_client::{
    Client, ClientConfig, ClientError, ConnectionState, Environment, EventKind, Listener,
    ListenerId, MessageId, RoomId, validate_address,
};
use tokio::{
    sync::{
        mpsc::{self, error::TrySendError},
        watch,
    },
    task::JoinHandle,
};
use tracing::debug;
use transport::{Connector, FallbackConnector, LongPollConnector, WebSocketConnector};
pub use worker::Status;
use worker::{Command, Shared, Worker};

/// Default bound on queued, not yet processed handle calls.
const DEFAULT_COMMAND_QUEUE: usize = 256;

/// Runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Realtime server base address (`wss://host/path`).
    pub server: String,
    /// State machine configuration (backoff, handshake timeout).
    pub client: ClientConfig,
    /// Capacity of the handle-to-worker command queue.
    pub command_queue: usize,
    /// Timeout for opening a transport.
    pub connect_timeout: Duration,
    /// Timeout for one long-poll request.
    pub poll_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            server: "ws://localhost:8080/realtime".to_string(),
            client: ClientConfig::default(),
            command_queue: DEFAULT_COMMAND_QUEUE,
            connect_timeout: Duration::from_secs(10),
            poll_timeout: Duration::from_secs(35),
        }
    }
}

impl RuntimeConfig {
    /// Websocket connector that falls back to long-polling.
    pub fn connector(
        &self,
    ) -> Result<FallbackConnector<WebSocketConnector, LongPollConnector>, TransportError> {
        Ok(FallbackConnector::new(
            WebSocketConnector::new(self.connect_timeout),
            LongPollConnector::new(self.connect_timeout, self.poll_timeout)?,
        ))
    }
}

/// Realtime service owned by the application root.
///
/// Dropping the service without calling [`RealtimeService::shutdown`] leaves
/// the worker running until every handle is dropped.
pub struct RealtimeService {
    handle: RealtimeHandle,
    worker: JoinHandle<()>,
}

impl RealtimeService {
    /// Start the worker on the current Tokio runtime with the system clock.
    ///
    /// # Errors
    ///
    /// Returns `RuntimeError::Client` if the configured server address is not
    /// a usable realtime endpoint.
    pub fn start<C: Connector>(config: RuntimeConfig, connector: C) -> Result<Self, RuntimeError> {
        Self::start_with_env(SystemEnv::new(), config, connector)
    }

    /// Start the worker with an explicit environment.
    pub fn start_with_env<E: Environment, C: Connector>(
        env: E,
        config: RuntimeConfig,
        connector: C,
    ) -> Result<Self, RuntimeError> {
        validate_address(&config.server)?;

        let (commands_tx, commands_rx) = mpsc::channel(config.command_queue.max(1));
        let (status_tx, status_rx) = watch::channel(Status::default());
        let shared = Arc::new(Shared::default());

        let client = Client::new(env.clone(), config.client);
        let worker = Worker::new(
            client,
            env,
            config.server,
            connector,
            commands_rx,
            Arc::clone(&shared),
            status_tx,
        );
        let worker = tokio::spawn(worker.run());

        let handle = RealtimeHandle { commands: commands_tx, shared, status: status_rx };
        Ok(Self { handle, worker })
    }

    /// A handle for UI components.
    pub fn handle(&self) -> RealtimeHandle {
        self.handle.clone()
    }

    /// Disconnect, stop the worker and wait for it to finish.
    ///
    /// Waits for queue capacity instead of failing when the command queue is
    /// full.
    pub async fn shutdown(self) -> Result<(), RuntimeError> {
        if self.handle.commands.send(Command::Shutdown).await.is_err() {
            debug!("realtime worker already stopped");
        }
        self.worker.await.map_err(|e| RuntimeError::WorkerPanicked(e.to_string()))
    }
}

/// Cloneable handle to the realtime service.
///
/// Every call returns immediately; commands are processed by the worker in
/// the order they were issued. State accessors read the snapshot the worker
/// published after its last processed input.
#[derive(Clone)]
pub struct RealtimeHandle {
    commands: mpsc::Sender<Command>,
    shared: Arc<Shared>,
    status: watch::Receiver<Status>,
}

impl RealtimeHandle {
    /// Connect with a bearer token from the token store.
    ///
    /// No-op if a connection is already in progress or established.
    pub fn connect(&self, token: SecretString) -> Result<(), RuntimeError> {
        if token.expose_secret().is_empty() {
            return Err(ClientError::MissingToken.into());
        }
        self.send(Command::Connect { token })
    }

    /// Full teardown: close the transport, cancel any pending retry, forget
    /// rooms.
    ///
    /// Listener dispatch still in flight stops before the next listener runs.
    pub fn disconnect(&self) -> Result<(), RuntimeError> {
        self.send(Command::Disconnect)?;
        self.shared.gate.halt();
        Ok(())
    }

    /// Join a room; deferred until authenticated.
    pub fn join_room(&self, room_id: impl Into<RoomId>) -> Result<(), RuntimeError> {
        self.send(Command::JoinRoom(room_id.into()))
    }

    /// Leave a room.
    pub fn leave_room(&self, room_id: impl Into<RoomId>) -> Result<(), RuntimeError> {
        self.send(Command::LeaveRoom(room_id.into()))
    }

    /// Signal that the local user started typing. Dropped unless connected.
    pub fn start_typing(&self, room_id: impl Into<RoomId>) -> Result<(), RuntimeError> {
        self.send(Command::StartTyping(room_id.into()))
    }

    /// Signal that the local user stopped typing. Dropped unless connected.
    pub fn stop_typing(&self, room_id: impl Into<RoomId>) -> Result<(), RuntimeError> {
        self.send(Command::StopTyping(room_id.into()))
    }

    /// Acknowledge a read message. Dropped unless connected.
    pub fn mark_read(
        &self,
        message_id: impl Into<MessageId>,
        room_id: impl Into<RoomId>,
    ) -> Result<(), RuntimeError> {
        self.send(Command::MarkRead { message_id: message_id.into(), room_id: room_id.into() })
    }

    /// Set the room currently on screen.
    pub fn set_active_room(&self, room_id: Option<RoomId>) -> Result<(), RuntimeError> {
        self.send(Command::SetActiveRoom(room_id))
    }

    /// Register a listener.
    pub fn on(&self, kind: impl Into<EventKind>, listener: Listener) -> ListenerId {
        self.shared.registry().on(kind, listener)
    }

    /// Remove a listener. Returns `false` if it was not registered.
    pub fn off(&self, kind: impl Into<EventKind>, id: ListenerId) -> bool {
        self.shared.registry().off(&kind.into(), id)
    }

    /// `true` only while authenticated.
    pub fn is_connected(&self) -> bool {
        self.status.borrow().state.is_connected()
    }

    /// Room currently on screen.
    pub fn current_room(&self) -> Option<RoomId> {
        self.status.borrow().current_room.clone()
    }

    /// Connection state.
    pub fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    /// Full status snapshot.
    pub fn status(&self) -> Status {
        self.status.borrow().clone()
    }

    /// Receiver notified whenever the status snapshot changes.
    pub fn watch_status(&self) -> watch::Receiver<Status> {
        self.status.clone()
    }

    /// Ask the worker to disconnect and stop.
    pub fn shutdown(&self) -> Result<(), RuntimeError> {
        self.send(Command::Shutdown)
    }

    fn send(&self, command: Command) -> Result<(), RuntimeError> {
        self.commands.try_send(command).map_err(|err| match err {
            TrySendError::Full(_) => RuntimeError::QueueFull,
            TrySendError::Closed(_) => RuntimeError::WorkerStopped,
        })
    }
}

impl std::fmt::Debug for RealtimeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeHandle").field("status", &*self.status.borrow()).finish()
    }
}
