//! Envelope-level error model.

use thiserror::Error;

/// Result type used by the addressing and codec layers.
pub type EnvelopeResult<T> = Result<T, EnvelopeError>;

/// Failure to interpret a transport envelope.
///
/// Keep this focused on deterministic, input-shaped failures (addressing,
/// encoding, identifiers). Storage and handler failures belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    /// The subscription address does not have the
    /// `projects/<project>/subscriptions/<name>` shape.
    #[error("invalid subscription address: {0}")]
    InvalidSubscription(String),

    /// The encoded payload could not be decoded into JSON.
    #[error("payload decode failed: {0}")]
    Decode(String),

    /// An outbound value could not be encoded.
    #[error("payload encode failed: {0}")]
    Encode(String),

    /// An identifier was empty or malformed.
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl EnvelopeError {
    pub fn invalid_subscription(msg: impl Into<String>) -> Self {
        Self::InvalidSubscription(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
