//! Worker task.
//!
//! The worker owns the [`Client`] state machine, the live [`Channel`] and the
//! single deadline sleep. It processes one input to completion before taking
//! the next, so the state machine is never re-entered:
//!
//! ```text
//! commands ─┐
//! opens    ─┼─> select! ─> Client::handle ─> execute actions ─> follow-up events
//! inbound  ─┤
//! deadline ─┘
//! ```
//!
//! Commands are polled first so a queued `disconnect()` wins over inbound
//! traffic that arrived in the meantime.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, PoisonError},
};

use secrecy::SecretString;
use tether_client::{
    Client, ClientAction, ClientEvent, ConnectionId, ConnectionState, DispatchGate, DispatchTicket,
    Environment, EventRegistry, MessageId, Notification, RoomId, run_listeners,
};
use tether_proto::ServerMessage;
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{
    error::TransportError,
    transport::{Channel, Connector},
};

/// Caller intent queued from a handle to the worker.
#[derive(Debug)]
pub(crate) enum Command {
    Connect { token: SecretString },
    Disconnect,
    JoinRoom(RoomId),
    LeaveRoom(RoomId),
    StartTyping(RoomId),
    StopTyping(RoomId),
    MarkRead { message_id: MessageId, room_id: RoomId },
    SetActiveRoom(Option<RoomId>),
    Shutdown,
}

/// State shared between the worker and every handle.
#[derive(Debug, Default)]
pub(crate) struct Shared {
    pub(crate) registry: Mutex<EventRegistry>,
    pub(crate) gate: DispatchGate,
}

impl Shared {
    pub(crate) fn registry(&self) -> std::sync::MutexGuard<'_, EventRegistry> {
        // Listeners never run under this lock, so a poisoned guard still holds
        // a consistent table.
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Snapshot of the client published after every processed input.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Status {
    /// Connection state.
    pub state: ConnectionState,
    /// Room currently on screen.
    pub current_room: Option<RoomId>,
    /// Joined rooms, in join order.
    pub rooms: Vec<RoomId>,
    /// Retries scheduled since the last successful authentication.
    pub reconnect_attempts: u32,
}

/// Result of a background open.
struct OpenOutcome {
    connection: ConnectionId,
    result: Result<Box<dyn Channel>, TransportError>,
}

struct Live {
    connection: ConnectionId,
    channel: Box<dyn Channel>,
}

pub(crate) struct Worker<E: Environment, C: Connector> {
    client: Client<E>,
    env: E,
    server: String,
    connector: Arc<C>,
    commands: mpsc::Receiver<Command>,
    opens_tx: mpsc::UnboundedSender<OpenOutcome>,
    opens_rx: mpsc::UnboundedReceiver<OpenOutcome>,
    pending_open: Option<(ConnectionId, JoinHandle<()>)>,
    live: Option<Live>,
    shared: Arc<Shared>,
    status: watch::Sender<Status>,
}

impl<E: Environment, C: Connector> Worker<E, C> {
    pub(crate) fn new(
        client: Client<E>,
        env: E,
        server: String,
        connector: C,
        commands: mpsc::Receiver<Command>,
        shared: Arc<Shared>,
        status: watch::Sender<Status>,
    ) -> Self {
        let (opens_tx, opens_rx) = mpsc::unbounded_channel();

        Self {
            client,
            env,
            server,
            connector: Arc::new(connector),
            commands,
            opens_tx,
            opens_rx,
            pending_open: None,
            live: None,
            shared,
            status,
        }
    }

    pub(crate) async fn run(mut self) {
        debug!(server = %self.server, "realtime worker started");

        loop {
            let deadline = self.client.next_deadline();

            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    None | Some(Command::Shutdown) => break,
                    Some(command) => self.on_command(command).await,
                },
                Some(outcome) = self.opens_rx.recv() => self.on_open(outcome).await,
                (connection, inbound) = recv_live(&mut self.live) => {
                    self.on_inbound(connection, inbound).await;
                },
                () = sleep_until(&self.env, deadline) => {
                    let now = self.env.now();
                    self.apply(ClientEvent::Tick { now }).await;
                },
            }
        }

        self.apply(ClientEvent::Disconnect).await;
        debug!("realtime worker stopped");
    }

    async fn on_command(&mut self, command: Command) {
        let event = match command {
            Command::Connect { token } => ClientEvent::Connect { server: self.server.clone(), token },
            Command::Disconnect => ClientEvent::Disconnect,
            Command::JoinRoom(room_id) => ClientEvent::JoinRoom { room_id },
            Command::LeaveRoom(room_id) => ClientEvent::LeaveRoom { room_id },
            Command::StartTyping(room_id) => ClientEvent::StartTyping { room_id },
            Command::StopTyping(room_id) => ClientEvent::StopTyping { room_id },
            Command::MarkRead { message_id, room_id } => ClientEvent::MarkRead { message_id, room_id },
            Command::SetActiveRoom(room_id) => ClientEvent::SetActiveRoom { room_id },
            Command::Shutdown => return,
        };

        self.apply(event).await;
    }

    async fn on_open(&mut self, outcome: OpenOutcome) {
        let OpenOutcome { connection, result } = outcome;

        if self.pending_open.as_ref().is_some_and(|(pending, _)| *pending == connection) {
            self.pending_open = None;
        }

        match result {
            Ok(mut channel) => {
                if self.client.connection_id() != Some(connection) {
                    debug!(%connection, "closing channel opened for abandoned connection");
                    close_quietly(channel.as_mut()).await;
                    return;
                }

                info!(%connection, transport = channel.transport(), "transport open");
                if let Some(mut previous) = self.live.replace(Live { connection, channel }) {
                    close_quietly(previous.channel.as_mut()).await;
                }
                self.apply(ClientEvent::TransportOpened { connection }).await;
            },
            Err(err) => {
                warn!(%connection, %err, "transport failed to open");
                self.apply(ClientEvent::TransportError { connection, reason: err.to_string() })
                    .await;
            },
        }
    }

    async fn on_inbound(
        &mut self,
        connection: ConnectionId,
        inbound: Option<Result<ServerMessage, TransportError>>,
    ) {
        let event = match inbound {
            Some(Ok(message)) => ClientEvent::MessageReceived { connection, message },
            Some(Err(err)) => {
                self.live = None;
                ClientEvent::TransportError { connection, reason: err.to_string() }
            },
            None => {
                self.live = None;
                ClientEvent::TransportClosed { connection, reason: "closed by server".to_string() }
            },
        };

        self.apply(event).await;
    }

    /// Feed `event` and every follow-up it causes through the state machine.
    ///
    /// All notifications produced for one input share one dispatch ticket.
    async fn apply(&mut self, event: ClientEvent<E::Instant>) {
        let ticket = self.shared.gate.ticket();
        let mut queue = VecDeque::from([event]);

        while let Some(event) = queue.pop_front() {
            let actions = match self.client.handle(event) {
                Ok(actions) => actions,
                Err(err) => {
                    warn!(%err, "client rejected input");
                    continue;
                },
            };

            for action in actions {
                if let Some(follow_up) = self.execute(action, ticket).await {
                    queue.push_back(follow_up);
                }
            }
        }

        self.publish_status();
    }

    async fn execute(
        &mut self,
        action: ClientAction,
        ticket: DispatchTicket,
    ) -> Option<ClientEvent<E::Instant>> {
        match action {
            ClientAction::OpenTransport { connection, server } => {
                self.open(connection, server);
                None
            },
            ClientAction::CloseTransport { connection } => {
                self.close(connection).await;
                None
            },
            ClientAction::Send(message) => {
                let live = self.live.as_mut()?;
                match live.channel.send(&message).await {
                    Ok(()) => None,
                    Err(err) => {
                        warn!(connection = %live.connection, %err, command = message.kind(), "send failed");
                        Some(ClientEvent::TransportError {
                            connection: live.connection,
                            reason: err.to_string(),
                        })
                    },
                }
            },
            ClientAction::Dispatch(notification) => {
                self.dispatch(&notification, ticket);
                None
            },
            ClientAction::ShowLocalNotification { room_id, message_id } => {
                self.dispatch(&Notification::LocalNotification { room_id, message_id }, ticket);
                None
            },
        }
    }

    fn open(&mut self, connection: ConnectionId, server: String) {
        if let Some((stale, task)) = self.pending_open.take() {
            debug!(connection = %stale, "abandoning in-flight open");
            task.abort();
        }

        let connector = Arc::clone(&self.connector);
        let opens = self.opens_tx.clone();
        let task = tokio::spawn(async move {
            let result = connector.connect(&server).await;
            let _ = opens.send(OpenOutcome { connection, result });
        });

        self.pending_open = Some((connection, task));
    }

    async fn close(&mut self, connection: ConnectionId) {
        if self.pending_open.as_ref().is_some_and(|(pending, _)| *pending == connection) {
            if let Some((_, task)) = self.pending_open.take() {
                task.abort();
            }
        }

        if self.live.as_ref().is_some_and(|live| live.connection == connection) {
            if let Some(mut live) = self.live.take() {
                debug!(%connection, transport = live.channel.transport(), "closing transport");
                close_quietly(live.channel.as_mut()).await;
            }
        }
    }

    fn dispatch(&self, notification: &Notification, ticket: DispatchTicket) {
        if !self.shared.gate.admits(ticket) {
            debug!(event = %notification.kind(), "dispatch halted by disconnect");
            return;
        }

        let listeners = self.shared.registry().snapshot(&notification.kind());
        let report = run_listeners(&listeners, notification, Some((&self.shared.gate, ticket)));

        if report.panicked > 0 {
            warn!(event = %notification.kind(), panicked = report.panicked, "listeners failed");
        }
    }

    fn publish_status(&self) {
        let status = Status {
            state: self.client.state(),
            current_room: self.client.current_room().cloned(),
            rooms: self.client.rooms().iter().cloned().collect(),
            reconnect_attempts: self.client.reconnect_attempts(),
        };

        self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}

async fn recv_live(
    live: &mut Option<Live>,
) -> (ConnectionId, Option<Result<ServerMessage, TransportError>>) {
    match live {
        Some(live) => (live.connection, live.channel.recv().await),
        None => std::future::pending().await,
    }
}

async fn sleep_until<E: Environment>(env: &E, deadline: Option<E::Instant>) {
    match deadline {
        Some(deadline) => env.sleep(env.until(deadline)).await,
        None => std::future::pending().await,
    }
}

async fn close_quietly(channel: &mut dyn Channel) {
    if let Err(err) = channel.close().await {
        debug!(%err, "error while closing transport");
    }
}
