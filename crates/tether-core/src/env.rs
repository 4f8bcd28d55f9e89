//! Environment abstraction for deterministic testing.
//!
//! The `Environment` trait decouples time-driven logic (handshake deadlines,
//! reconnection backoff) from the system clock. This enables:
//!
//! - Deterministic Simulation: the harness drives a virtual clock, so a
//!   five-attempt backoff sequence runs in microseconds and reproduces exactly.
//!
//! - Production Runtime: the Tokio implementation uses the real clock without
//!   any change to the client state machine.
//!
//! # Invariants
//!
//! - Monotonicity: `env.now()` must never go backwards
//! - Isolation: Implementations must not share global state

use std::{
    fmt::Debug,
    future::Future,
    ops::{Add, Sub},
    time::Duration,
};

/// Abstract environment providing time and async sleeping.
///
/// This trait is the foundation of the Sans-IO architecture. Protocol logic
/// only ever compares instants produced by `now()`; it never sleeps itself.
pub trait Environment: Clone + Send + Sync + 'static {
    /// Point in time produced by this environment's clock.
    type Instant: Copy
        + Ord
        + Debug
        + Send
        + Sync
        + Add<Duration, Output = Self::Instant>
        + Sub<Output = Duration>;

    /// Returns the current time.
    ///
    /// # Invariants
    ///
    /// - Monotonicity: This method MUST return values that never decrease
    ///   within a single execution context.
    fn now(&self) -> Self::Instant;

    /// Sleeps for the specified duration.
    ///
    /// This is the ONLY async method in the trait, and it should only be used
    /// by driver code (not protocol logic).
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + Send;

    /// Duration from `now()` until `deadline`, zero if it already passed.
    fn until(&self, deadline: Self::Instant) -> Duration {
        let now = self.now();
        if deadline > now { deadline - now } else { Duration::ZERO }
    }
}
