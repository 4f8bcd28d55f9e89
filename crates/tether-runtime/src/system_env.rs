//! Production Environment implementation using the Tokio clock.

use std::time::Duration;

use tether_core::env::Environment;
use tokio::time::Instant;

/// Production environment.
///
/// Uses `tokio::time::Instant` rather than `std::time::Instant`, so a paused
/// or simulated Tokio clock drives reconnection and handshake deadlines too.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}
