//! Transport channels.
//!
//! A [`Connector`] opens one physical [`Channel`] per connection attempt. The
//! worker owns the channel for its lifetime and never shares it. Which
//! concrete transport is in use is invisible to the state machine.
//!
//! - [`WebSocketConnector`]: message-framed duplex channel (preferred)
//! - [`LongPollConnector`]: HTTP long-polling channel
//! - [`FallbackConnector`]: tries a primary connector, degrades to a secondary

mod fallback;
mod polling;
mod websocket;

use async_trait::async_trait;
pub use fallback::FallbackConnector;
pub use polling::{LongPollChannel, LongPollConnector};
use tether_proto::{ClientMessage, ServerMessage};
use url::Url;
pub use websocket::{WebSocketChannel, WebSocketConnector};

use crate::error::TransportError;

/// Opens physical channels to the realtime server.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a channel to `server`, completing the transport-level handshake.
    async fn connect(&self, server: &str) -> Result<Box<dyn Channel>, TransportError>;
}

/// One open physical channel.
#[async_trait]
pub trait Channel: Send {
    /// Short transport name for logs (`websocket`, `long-poll`, ...).
    fn transport(&self) -> &'static str;

    /// Send one message.
    async fn send(&mut self, message: &ClientMessage) -> Result<(), TransportError>;

    /// Next inbound message.
    ///
    /// `None` means the channel closed normally. Must be cancel safe: the
    /// worker polls it inside `select!`.
    async fn recv(&mut self) -> Option<Result<ServerMessage, TransportError>>;

    /// Close the channel. Further calls are no-ops.
    async fn close(&mut self) -> Result<(), TransportError>;
}

#[async_trait]
impl<C: Connector + ?Sized> Connector for std::sync::Arc<C> {
    async fn connect(&self, server: &str) -> Result<Box<dyn Channel>, TransportError> {
        (**self).connect(server).await
    }
}

/// Rewrite the scheme of `server` to its websocket or HTTP counterpart.
pub(crate) fn with_scheme(server: &str, secure: &str, plain: &str) -> Result<Url, TransportError> {
    let invalid = || TransportError::InvalidEndpoint(server.to_string());

    let mut url = Url::parse(server).map_err(|_| invalid())?;
    let scheme = match url.scheme() {
        "wss" | "https" => secure,
        "ws" | "http" => plain,
        _ => return Err(invalid()),
    };
    url.set_scheme(scheme).map_err(|()| invalid())?;

    Ok(url)
}
