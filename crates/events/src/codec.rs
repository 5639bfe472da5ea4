//! Payload codec: base64-encoded JSON text <-> `serde_json::Value`.
//!
//! Pure functions, no state. The decoded tree is transport-agnostic; typing it
//! is the validator's job.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use serde_json::Value as JsonValue;

use oncely_core::{EnvelopeError, EnvelopeResult};

/// Decode a push payload (`base64(json)`) into a JSON tree.
pub fn decode_payload(encoded: &str) -> EnvelopeResult<JsonValue> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| EnvelopeError::decode(format!("base64: {e}")))?;

    let text = String::from_utf8(bytes).map_err(|e| EnvelopeError::decode(format!("utf-8: {e}")))?;

    serde_json::from_str(&text).map_err(|e| EnvelopeError::decode(format!("json: {e}")))
}

/// Encode an outbound value the way the transport expects (`base64(json)`).
pub fn encode_payload<T: Serialize + ?Sized>(value: &T) -> EnvelopeResult<String> {
    let text = serde_json::to_string(value).map_err(|e| EnvelopeError::encode(e.to_string()))?;
    Ok(STANDARD.encode(text))
}
