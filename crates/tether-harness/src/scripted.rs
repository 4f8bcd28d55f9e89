//! Scripted in-memory server for driving the production runtime.
//!
//! [`ScriptedServer`] implements [`Connector`]: every open creates a session
//! backed by an unbounded channel, so the real worker runs end to end without
//! sockets. Tests steer the server (accept or refuse opens, stay silent on
//! authentication, push events, drop sessions) and inspect what it received.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use tether_proto::{ClientMessage, ServerMessage};
use tether_runtime::{
    TransportError,
    transport::{Channel, Connector},
};
use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug)]
struct Session {
    id: u64,
    outbound: mpsc::UnboundedSender<ServerMessage>,
    authenticated: bool,
}

#[derive(Debug, Default)]
struct ServerState {
    valid_tokens: HashSet<String>,
    refuse_opens: bool,
    silent: bool,
    opens: usize,
    next_session: u64,
    sessions: Vec<Session>,
    received: Vec<(u64, ClientMessage)>,
}

/// Cloneable in-memory realtime server.
#[derive(Debug, Clone, Default)]
pub struct ScriptedServer {
    state: Arc<Mutex<ServerState>>,
}

impl ScriptedServer {
    /// Server accepting `token`.
    pub fn new(token: &str) -> Self {
        let server = Self::default();
        server.accept_token(token);
        server
    }

    /// Accept `token` on future authentications.
    pub fn accept_token(&self, token: &str) {
        self.lock().valid_tokens.insert(token.to_string());
    }

    /// Make every open fail until called with `false`.
    pub fn refuse_opens(&self, refuse: bool) {
        self.lock().refuse_opens = refuse;
    }

    /// Stop answering authentication.
    pub fn silent(&self, silent: bool) {
        self.lock().silent = silent;
    }

    /// Transport opens attempted so far.
    pub fn opens(&self) -> usize {
        self.lock().opens
    }

    /// Sessions currently open.
    pub fn live_sessions(&self) -> usize {
        self.lock().sessions.len()
    }

    /// Every message received, in arrival order.
    pub fn received(&self) -> Vec<ClientMessage> {
        self.lock().received.iter().map(|(_, message)| message.clone()).collect()
    }

    /// Messages received on the most recent session.
    pub fn received_on_latest(&self) -> Vec<ClientMessage> {
        let state = self.lock();
        let Some(latest) = state.received.iter().map(|(id, _)| *id).max() else {
            return Vec::new();
        };
        state.received.iter().filter(|(id, _)| *id == latest).map(|(_, m)| m.clone()).collect()
    }

    /// Push a named event to every authenticated session.
    ///
    /// Returns the number of sessions it reached.
    pub fn push_event(&self, name: &str, payload: serde_json::Value) -> usize {
        let state = self.lock();
        let mut reached = 0;

        for session in state.sessions.iter().filter(|session| session.authenticated) {
            let message = ServerMessage::Event { name: name.to_string(), payload: payload.clone() };
            if session.outbound.send(message).is_ok() {
                reached += 1;
            }
        }

        reached
    }

    /// Close every session from the server side.
    pub fn drop_all(&self) {
        let dropped = std::mem::take(&mut self.lock().sessions);
        debug!(sessions = dropped.len(), "dropping sessions");
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn receive(&self, session: u64, message: &ClientMessage) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.received.push((session, message.clone()));

        let ClientMessage::Authenticate { token } = message else {
            return Ok(());
        };
        if state.silent {
            return Ok(());
        }

        let accepted = state.valid_tokens.contains(token);
        let session = state
            .sessions
            .iter_mut()
            .find(|s| s.id == session)
            .ok_or(TransportError::Closed)?;

        let reply = if accepted {
            session.authenticated = true;
            ServerMessage::Authenticated
        } else {
            ServerMessage::Unauthorized { reason: Some("invalid token".to_string()) }
        };
        session.outbound.send(reply).map_err(|_| TransportError::Closed)
    }

    fn close(&self, session: u64) {
        self.lock().sessions.retain(|s| s.id != session);
    }
}

#[async_trait]
impl Connector for ScriptedServer {
    async fn connect(&self, _server: &str) -> Result<Box<dyn Channel>, TransportError> {
        let mut state = self.lock();
        state.opens += 1;

        if state.refuse_opens {
            return Err(TransportError::Protocol("connection refused".to_string()));
        }

        state.next_session += 1;
        let id = state.next_session;
        let (outbound, inbound) = mpsc::unbounded_channel();
        state.sessions.push(Session { id, outbound, authenticated: false });

        Ok(Box::new(ScriptedChannel { id, server: self.clone(), inbound, closed: false }))
    }
}

/// Client end of a scripted session.
struct ScriptedChannel {
    id: u64,
    server: ScriptedServer,
    inbound: mpsc::UnboundedReceiver<ServerMessage>,
    closed: bool,
}

#[async_trait]
impl Channel for ScriptedChannel {
    fn transport(&self) -> &'static str {
        "scripted"
    }

    async fn send(&mut self, message: &ClientMessage) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.server.receive(self.id, message)
    }

    async fn recv(&mut self) -> Option<Result<ServerMessage, TransportError>> {
        if self.closed {
            return None;
        }
        self.inbound.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.closed {
            self.closed = true;
            self.server.close(self.id);
        }
        Ok(())
    }
}
