//! Fuzz target for the wire codec.
//!
//! # Invariants
//!
//! - Decoding arbitrary text NEVER panics
//! - A decoded server message re-encodes and decodes to itself
//! - A batch element is accepted exactly when it is accepted as a single frame
//! - Event payloads of any shape yield a `ServerEvent` (unknown or malformed
//!   payloads fall back to the catch-all variant)

#![no_main]

use libfuzzer_sys::fuzz_target;
use tether_proto::{ServerEvent, ServerMessage, decode_server, decode_server_batch, encode_server};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(message) = decode_server(text) {
        let encoded = encode_server(&message).expect("decoded message must re-encode");
        let decoded = decode_server(&encoded).expect("re-encoded message must decode");
        assert_eq!(decoded, message);

        if let ServerMessage::Event { name, payload } = message {
            let event = ServerEvent::from_wire(&name, payload);
            assert_eq!(event.name(), name);
        }
    }

    // A batch element decodes exactly like the same text sent as one frame.
    if let Ok(elements) = decode_server_batch(text) {
        if let Ok(values) = serde_json::from_str::<Vec<serde_json::Value>>(text) {
            for (element, value) in elements.iter().zip(values) {
                let single = decode_server(&value.to_string());
                assert_eq!(element.is_ok(), single.is_ok());
            }
        }
    }
});
