//! Model client state machine.

use std::time::Duration;

use tether_core::{ConnectionState, ReconnectPolicy};
use tether_proto::RoomId;

use super::operation::{MODEL_ROOMS, ModelRoomId, Operation, room_id};

/// Coarse lifecycle state of the model.
///
/// The model never rests in a handshake state: opens and authentication
/// complete within the operation that starts them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelState {
    /// No session, no retry pending.
    Disconnected,
    /// Session live and authenticated.
    Authenticated,
    /// Waiting for the retry at `at`.
    Reconnecting {
        /// Time of the next retry.
        at: Duration,
    },
}

/// Observable state for oracle comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservableState {
    /// Connection state.
    pub state: ConnectionState,
    /// Joined rooms, in join order.
    pub rooms: Vec<RoomId>,
    /// Retries scheduled since the last successful authentication.
    pub reconnect_attempts: u32,
    /// Whether a retry is pending.
    pub pending_reconnect: bool,
}

/// Reference client.
#[derive(Debug, Clone)]
pub struct ModelClient {
    policy: ReconnectPolicy,
    now: Duration,
    state: ModelState,
    /// Token validity of the held session, `None` without a session.
    session: Option<bool>,
    attempts: u32,
    rooms: Vec<ModelRoomId>,
    network_up: bool,
}

impl ModelClient {
    /// Model following `policy`, disconnected, with the network up.
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            now: Duration::ZERO,
            state: ModelState::Disconnected,
            session: None,
            attempts: 0,
            rooms: Vec::new(),
            network_up: true,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ModelState {
        self.state
    }

    /// Apply one operation.
    pub fn apply(&mut self, op: &Operation) {
        match *op {
            Operation::Connect { valid_token } => {
                if self.state != ModelState::Authenticated {
                    self.session = Some(valid_token);
                    self.attempts = 0;
                    self.try_open();
                }
            },
            Operation::Disconnect => {
                self.state = ModelState::Disconnected;
                self.session = None;
                self.attempts = 0;
                self.rooms.clear();
            },
            Operation::JoinRoom { room } => {
                let room = room % MODEL_ROOMS;
                if !self.rooms.contains(&room) {
                    self.rooms.push(room);
                }
            },
            Operation::LeaveRoom { room } => {
                let room = room % MODEL_ROOMS;
                self.rooms.retain(|r| *r != room);
            },
            Operation::DropTransport => {
                if self.state == ModelState::Authenticated {
                    self.fail();
                }
            },
            Operation::SetNetwork { up } => self.network_up = up,
            Operation::AdvanceTime { millis } => {
                self.now += Duration::from_millis(u64::from(millis));
                if let ModelState::Reconnecting { at } = self.state {
                    if at <= self.now {
                        self.try_open();
                    }
                }
            },
            Operation::StartTyping { .. } | Operation::DeliverMessage { .. } => {},
        }
    }

    /// Extract observable state for comparison.
    pub fn observable_state(&self) -> ObservableState {
        let state = match self.state {
            ModelState::Disconnected => ConnectionState::Disconnected,
            ModelState::Authenticated => ConnectionState::Authenticated,
            ModelState::Reconnecting { .. } => ConnectionState::Reconnecting,
        };

        ObservableState {
            state,
            rooms: self.rooms.iter().copied().map(room_id).collect(),
            reconnect_attempts: self.attempts,
            pending_reconnect: matches!(self.state, ModelState::Reconnecting { .. }),
        }
    }

    fn try_open(&mut self) {
        match self.session {
            None => self.state = ModelState::Disconnected,
            Some(_) if !self.network_up => self.fail(),
            Some(true) => {
                self.state = ModelState::Authenticated;
                self.attempts = 0;
            },
            Some(false) => {
                self.state = ModelState::Disconnected;
                self.session = None;
            },
        }
    }

    fn fail(&mut self) {
        if self.attempts >= self.policy.max_attempts {
            self.state = ModelState::Disconnected;
            self.session = None;
            return;
        }

        let shift = self.attempts.min(self.policy.exponent_cap);
        let delay = self.policy.base_delay * 2_u32.pow(shift);
        self.attempts += 1;
        self.state = ModelState::Reconnecting { at: self.now + delay };
    }
}
