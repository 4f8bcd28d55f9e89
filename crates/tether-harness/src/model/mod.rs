//! Reference model for model-based testing.
//!
//! The model captures the observable connection lifecycle in a few lines of
//! obviously-correct code: no transports, no actions, no listeners. Random
//! operation sequences are applied to both the model and a [`SimWorld`], and
//! their observable states must match after every step.
//!
//! [`SimWorld`]: crate::SimWorld

mod client;
pub mod operation;

pub use client::{ModelClient, ModelState, ObservableState};
pub use operation::{MODEL_ROOMS, ModelRoomId, Operation, room_id};
