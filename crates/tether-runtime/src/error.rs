//! Runtime error types.

use tether_client::ClientError;
use tether_proto::ProtoError;
use thiserror::Error;

/// Errors surfaced to callers of the runtime handle.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The worker task has stopped; the handle is no longer usable.
    #[error("realtime worker has stopped")]
    WorkerStopped,

    /// The command queue is full.
    #[error("command queue is full")]
    QueueFull,

    /// The worker task panicked.
    #[error("realtime worker panicked: {0}")]
    WorkerPanicked(String),

    /// Invalid configuration or arguments.
    #[error(transparent)]
    Client(#[from] ClientError),
}

/// Errors produced by a transport channel.
///
/// These never reach UI callers; the worker turns them into transport
/// signals for the state machine.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Websocket handshake or I/O failure.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// HTTP request failure.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Frame could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] ProtoError),

    /// Server address could not be mapped to a transport URL.
    #[error("invalid endpoint {0:?}")]
    InvalidEndpoint(String),

    /// Opening the transport took longer than allowed.
    #[error("connect timed out")]
    Timeout,

    /// The server answered outside the transport's contract.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The channel was already closed.
    #[error("channel closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_pass_through() {
        let err = RuntimeError::from(ClientError::MissingToken);
        assert_eq!(err.to_string(), "missing bearer token");
    }

    #[test]
    fn transport_error_display() {
        assert_eq!(TransportError::Timeout.to_string(), "connect timed out");
        assert_eq!(
            TransportError::InvalidEndpoint("ftp://x".to_string()).to_string(),
            "invalid endpoint \"ftp://x\""
        );
    }
}
