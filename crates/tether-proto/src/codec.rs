//! Text framing for both transport channels.
//!
//! - Duplex channel: one JSON object per text frame.
//! - Long-poll channel: a JSON array of objects per HTTP body. An empty body
//!   is an empty batch (poll timed out with nothing to deliver).

use serde::{Serialize, de::DeserializeOwned};

use crate::{ClientMessage, ProtoError, ServerMessage};

/// Encode a client message as a single text frame.
pub fn encode_client(message: &ClientMessage) -> Result<String, ProtoError> {
    Ok(serde_json::to_string(message)?)
}

/// Decode a client message from a single text frame.
pub fn decode_client(text: &str) -> Result<ClientMessage, ProtoError> {
    Ok(serde_json::from_str(text)?)
}

/// Encode a server message as a single text frame.
pub fn encode_server(message: &ServerMessage) -> Result<String, ProtoError> {
    Ok(serde_json::to_string(message)?)
}

/// Decode a server message from a single text frame.
///
/// # Errors
///
/// Returns [`ProtoError::Malformed`] for an event with an empty name, and
/// [`ProtoError::Json`] for anything that is not a valid message.
pub fn decode_server(text: &str) -> Result<ServerMessage, ProtoError> {
    validate_server(serde_json::from_str(text)?)
}

/// Decode a long-poll batch of server messages element by element.
///
/// Only a body that is not a JSON array fails as a whole. Each element is
/// checked like a single frame, so one bad element does not hide the rest.
pub fn decode_server_batch(
    body: &str,
) -> Result<Vec<Result<ServerMessage, ProtoError>>, ProtoError> {
    let elements: Vec<serde_json::Value> = decode_batch(body)?;

    Ok(elements
        .into_iter()
        .map(|element| validate_server(serde_json::from_value(element)?))
        .collect())
}

fn validate_server(message: ServerMessage) -> Result<ServerMessage, ProtoError> {
    if let ServerMessage::Event { name, .. } = &message {
        if name.is_empty() {
            return Err(ProtoError::Malformed { reason: "event name is empty".to_string() });
        }
    }

    Ok(message)
}

/// Encode a batch of messages for the long-poll channel.
pub fn encode_batch<T: Serialize>(messages: &[T]) -> Result<String, ProtoError> {
    Ok(serde_json::to_string(messages)?)
}

/// Decode a long-poll batch.
pub fn decode_batch<T: DeserializeOwned>(body: &str) -> Result<Vec<T>, ProtoError> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }

    Ok(serde_json::from_str(body)?)
}
