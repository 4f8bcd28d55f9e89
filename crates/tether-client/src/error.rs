//! Client error types.

use thiserror::Error;

/// Errors from client operations.
///
/// Only `connect` can fail. Every other operation degrades to a no-op when
/// the client is not in a state to perform it.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Server address is not a usable realtime endpoint.
    #[error("invalid server address {address:?}: {reason}")]
    InvalidAddress {
        /// The rejected address.
        address: String,
        /// Why it was rejected.
        reason: String,
    },

    /// `connect` was called without a bearer token.
    #[error("missing bearer token")]
    MissingToken,
}
