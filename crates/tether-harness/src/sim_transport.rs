//! Websocket connector over turmoil's simulated network.
//!
//! Identical framing to the production websocket transport: the connector
//! only swaps the TCP stream for `turmoil::net::TcpStream`, so partitions,
//! latency and packet loss reach the real [`WebSocketChannel`].

use async_trait::async_trait;
use tether_runtime::{
    TransportError,
    transport::{Channel, Connector, WebSocketChannel},
};
use tokio_tungstenite::{client_async, tungstenite::http::Uri};
use tracing::debug;

/// Opens websocket channels to turmoil hosts.
///
/// The server address names the host: `ws://server:8080/realtime`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimWebSocketConnector;

#[async_trait]
impl Connector for SimWebSocketConnector {
    async fn connect(&self, server: &str) -> Result<Box<dyn Channel>, TransportError> {
        let invalid = || TransportError::InvalidEndpoint(server.to_string());

        let uri: Uri = server.parse().map_err(|_| invalid())?;
        let host = uri.host().ok_or_else(invalid)?;
        let port = uri.port_u16().unwrap_or(80);

        let stream = turmoil::net::TcpStream::connect(format!("{host}:{port}"))
            .await
            .map_err(|err| TransportError::Protocol(err.to_string()))?;
        let (socket, _response) = client_async(server, stream).await?;

        debug!(%server, "simulated websocket connected");
        Ok(Box::new(WebSocketChannel::new(socket)))
    }
}
