//! Websocket channel over `tokio-tungstenite`.
//!
//! One JSON text frame per message in both directions. Binary frames are
//! ignored.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tether_proto::{ClientMessage, ServerMessage, decode_server, encode_client};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::{WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, warn};

use super::{Channel, Connector, with_scheme};
use crate::error::TransportError;

/// Opens websocket channels.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    connect_timeout: Duration,
}

impl WebSocketConnector {
    /// Create a connector that gives up on the handshake after `connect_timeout`.
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, server: &str) -> Result<Box<dyn Channel>, TransportError> {
        let url = with_scheme(server, "wss", "ws")?;

        let (socket, _response) = tokio::time::timeout(self.connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| TransportError::Timeout)??;

        debug!(%url, "websocket connected");
        Ok(Box::new(WebSocketChannel::new(socket)))
    }
}

/// Open websocket channel.
pub struct WebSocketChannel<S> {
    socket: WebSocketStream<S>,
    closed: bool,
}

impl<S> WebSocketChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an established websocket stream.
    pub fn new(socket: WebSocketStream<S>) -> Self {
        Self { socket, closed: false }
    }
}

#[async_trait]
impl<S> Channel for WebSocketChannel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn transport(&self) -> &'static str {
        "websocket"
    }

    async fn send(&mut self, message: &ClientMessage) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }

        let text = encode_client(message)?;
        self.socket.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<ServerMessage, TransportError>> {
        if self.closed {
            return None;
        }

        loop {
            match self.socket.next().await? {
                Ok(Message::Text(text)) => match decode_server(text.as_str()) {
                    Ok(message) => return Some(Ok(message)),
                    Err(err) => warn!(%err, "dropping malformed server frame"),
                },
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "websocket closed by server");
                    self.closed = true;
                    return None;
                },
                // Pongs to pings are queued by tungstenite and flushed on the next read.
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Binary(_) | Message::Frame(_)) => {},
                Err(err) => return Some(Err(err.into())),
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if std::mem::replace(&mut self.closed, true) {
            return Ok(());
        }

        self.socket.close(None).await?;
        Ok(())
    }
}
