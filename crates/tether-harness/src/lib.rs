//! Deterministic simulation harness for the Tether realtime client.
//!
//! - [`SimEnv`]: virtual clock for the sans-IO client
//! - [`SimWorld`]: client plus simulated backend, driven step by step
//! - [`ScriptedServer`]: in-memory [`Connector`] for the production runtime
//! - [`SimWebSocketConnector`]: real websocket framing over turmoil's network
//!
//! # Model-Based Testing
//!
//! The `model` module provides a reference implementation for model-based
//! testing. Operations are applied to both the model and a [`SimWorld`], and
//! their observable states are compared.
//!
//! [`Connector`]: tether_runtime::transport::Connector

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod model;
pub mod scripted;
pub mod sim_env;
pub mod sim_transport;
pub mod sim_world;

pub use model::{ModelClient, ModelRoomId, ModelState, ObservableState, Operation};
pub use scripted::ScriptedServer;
pub use sim_env::{SimEnv, SimInstant};
pub use sim_transport::SimWebSocketConnector;
pub use sim_world::{SIM_SERVER, SimBackend, SimWorld, VALID_TOKEN, new_message_payload};

/// Apply a model operation to a [`SimWorld`].
pub fn apply_to_world(world: &mut SimWorld, op: &Operation) {
    match *op {
        Operation::Connect { valid_token } => {
            let token = if valid_token { VALID_TOKEN } else { "revoked-token" };
            if let Err(err) = world.connect(token) {
                tracing::debug!(%err, "connect rejected");
            }
        },
        Operation::Disconnect => world.disconnect(),
        Operation::JoinRoom { room } => world.join(model::room_id(room).as_str()),
        Operation::LeaveRoom { room } => world.leave(model::room_id(room).as_str()),
        Operation::StartTyping { room } => world.start_typing(model::room_id(room).as_str()),
        Operation::DropTransport => world.drop_transport(),
        Operation::SetNetwork { up } => world.set_network(up),
        Operation::DeliverMessage { room } => {
            let room_id = model::room_id(room);
            world.push_event("new_message", new_message_payload(&format!("msg-{room}"), room_id.as_str()));
        },
        Operation::AdvanceTime { millis } => {
            world.advance(std::time::Duration::from_millis(u64::from(millis)));
        },
    }
}
