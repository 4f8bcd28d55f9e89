//! Tether Core
//!
//! I/O-free building blocks shared by the client state machine, the production
//! runtime and the simulation harness.
//!
//! - [`env::Environment`]: clock and sleep, so time-driven logic can run against
//!   a virtual clock in tests
//! - [`ConnectionState`]: the connection lifecycle states
//! - [`ReconnectPolicy`] / [`Backoff`]: bounded exponential reconnection delays

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod backoff;
pub mod env;
mod state;

pub use backoff::{Backoff, ReconnectPolicy};
pub use env::Environment;
pub use state::ConnectionState;
