//! Protocol error types.

use thiserror::Error;

/// Errors from encoding or decoding wire messages.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Message parsed as JSON but violates the protocol shape.
    #[error("malformed message: {reason}")]
    Malformed {
        /// Description of the violation.
        reason: String,
    },
}
