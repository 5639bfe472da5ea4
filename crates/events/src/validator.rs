//! Payload validators: raw decoded JSON -> typed channel payload.

use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;

/// Why a decoded payload was not accepted by a channel.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationFailure {
    /// The validator returned no payload.
    #[error("payload did not match the channel schema")]
    NoMatch,

    /// The validator rejected the payload with a reason.
    #[error("payload rejected: {0}")]
    Rejected(String),

    /// The validator panicked.
    #[error("validator panicked: {0}")]
    Panicked(String),
}

/// Maps a decoded payload to a typed one.
///
/// Validators must be stateless; they may be called concurrently.
pub trait Validator: Send + Sync {
    type Payload: Send + 'static;

    fn validate(&self, raw: &JsonValue) -> Result<Self::Payload, ValidationFailure>;
}

/// Validator backed by a closure returning `Option<P>` (`None` = no match).
pub struct ValidatorFn<F, P> {
    f: F,
    _payload: PhantomData<fn() -> P>,
}

/// Wrap a closure as a [`Validator`].
pub fn validator_fn<P, F>(f: F) -> ValidatorFn<F, P>
where
    F: Fn(&JsonValue) -> Option<P> + Send + Sync,
    P: Send + 'static,
{
    ValidatorFn {
        f,
        _payload: PhantomData,
    }
}

impl<F, P> Validator for ValidatorFn<F, P>
where
    F: Fn(&JsonValue) -> Option<P> + Send + Sync,
    P: Send + 'static,
{
    type Payload = P;

    fn validate(&self, raw: &JsonValue) -> Result<P, ValidationFailure> {
        (self.f)(raw).ok_or(ValidationFailure::NoMatch)
    }
}

/// Validator that deserializes the payload into `P` with serde.
///
/// The serde error message becomes the rejection reason.
pub struct Schema<P> {
    _payload: PhantomData<fn() -> P>,
}

impl<P> Schema<P> {
    pub fn new() -> Self {
        Self {
            _payload: PhantomData,
        }
    }
}

impl<P> Default for Schema<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> Validator for Schema<P>
where
    P: DeserializeOwned + Send + 'static,
{
    type Payload = P;

    fn validate(&self, raw: &JsonValue) -> Result<P, ValidationFailure> {
        P::deserialize(raw).map_err(|e| ValidationFailure::Rejected(e.to_string()))
    }
}
