//! Primary/secondary connector.

use async_trait::async_trait;
use tracing::warn;

use super::{Channel, Connector};
use crate::error::TransportError;

/// Tries `primary` first and degrades to `secondary` when it cannot open.
///
/// The choice is made per connection attempt, so a later attempt goes back
/// to the primary transport.
pub struct FallbackConnector<P, S> {
    primary: P,
    secondary: S,
}

impl<P: Connector, S: Connector> FallbackConnector<P, S> {
    /// Create a fallback pair.
    pub fn new(primary: P, secondary: S) -> Self {
        Self { primary, secondary }
    }
}

#[async_trait]
impl<P: Connector, S: Connector> Connector for FallbackConnector<P, S> {
    async fn connect(&self, server: &str) -> Result<Box<dyn Channel>, TransportError> {
        match self.primary.connect(server).await {
            Ok(channel) => Ok(channel),
            Err(err) => {
                warn!(%err, "primary transport unavailable, falling back");
                self.secondary.connect(server).await
            },
        }
    }
}
