//! Event admission pipeline (the effectively-once core).
//!
//! The `Dispatcher` turns at-least-once deliveries into at-most-one successful
//! handler run per dedup key:
//!
//! ```text
//! PushEnvelope
//!   ↓
//! 1. Resolve subscription from the address         → InvalidSubscription
//!   ↓
//! 2. Build dedup key (message_id, subscription), read the ledger
//!   ↓
//! 3. Last outcome Completed?                        → Ok(Duplicate), nothing else touched
//!   ↓
//! 4. Record the attempt (durable marker before any user code runs)
//!   ↓
//! 5. Look up the channel                           → MissingHandlerForSubscription
//!   ↓
//! 6. Decode + validate (panic-isolated)            → Failed recorded, InvalidEventData
//!   ↓
//! 7. Run the handler (panic-isolated)
//!   ↓
//! 8. Success         → Completed recorded, Ok(Processed)
//! 9. FailedToProcess → Failed recorded, HandlerFailedToProcessMessage
//! ```
//!
//! Everything except ledger IO failure is recovered into a classified result.
//! A ledger failure propagates as `DispatchError::Ledger`: the admission state
//! is unknown, so the caller must not acknowledge.
//!
//! ## Races
//!
//! The ledger only guarantees atomic record creation. Two concurrent
//! admissions of the same key may both run the handler; each caller sees its
//! own handler's outcome, and the ledger keeps the first `Completed` it gets.
//! Callers needing single-flight execution add a lease on top.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};

use futures::FutureExt;
use thiserror::Error;
use tracing::{Span, debug, error, field, info, instrument, warn};

use oncely_core::{DedupKey, EnvelopeError, MessageId, SubscriptionName};
use oncely_events::{
    AttemptOutcome, Channel, ChannelRegistry, HandlerOutcome, LedgerRecord, PushEnvelope, ValidatedPayload,
    ValidationFailure, decode_payload, resolve_subscription,
};

use crate::ledger::{Ledger, LedgerError};

/// Successful admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The handler ran and reported success.
    Processed,
    /// The key had already completed; the handler was not called.
    Duplicate,
}

/// Error category, independent of the concrete variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed subscription address; a transport/config mismatch.
    Addressing,
    /// Payload did not decode or did not satisfy the channel schema.
    Validation,
    /// Well-formed subscription with no registered channel.
    Configuration,
    /// The handler reported failure or panicked; the retryable steady state.
    Processing,
    /// Ledger IO failed; admission state unknown.
    Storage,
}

/// Classified admission failure.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("invalid subscription: {0}")]
    InvalidSubscription(String),

    #[error("invalid event data for {subscription}: {reason}")]
    InvalidEventData {
        subscription: SubscriptionName,
        reason: String,
    },

    #[error("no handler registered for subscription {0}")]
    MissingHandlerForSubscription(SubscriptionName),

    #[error(
        "handler for {subscription} failed to process message {message_id}: {}",
        reason.as_deref().unwrap_or("no reason given")
    )]
    HandlerFailedToProcessMessage {
        subscription: SubscriptionName,
        message_id: MessageId,
        reason: Option<String>,
    },

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::InvalidSubscription(_) => ErrorKind::Addressing,
            DispatchError::InvalidEventData { .. } => ErrorKind::Validation,
            DispatchError::MissingHandlerForSubscription(_) => ErrorKind::Configuration,
            DispatchError::HandlerFailedToProcessMessage { .. } => ErrorKind::Processing,
            DispatchError::Ledger(_) => ErrorKind::Storage,
        }
    }

    /// Whether the transport should acknowledge despite the error.
    pub fn acknowledgement(&self, policy: AckPolicy) -> Acknowledgement {
        match self {
            DispatchError::MissingHandlerForSubscription(_) if policy.ack_missing_handler => Acknowledgement::Ack,
            _ => Acknowledgement::Nack,
        }
    }
}

/// Transport-level signal for a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acknowledgement {
    /// Done with this delivery.
    Ack,
    /// Leave it for redelivery.
    Nack,
}

/// Deployment policy for mapping results onto acknowledgements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AckPolicy {
    /// Treat unregistered channels as non-retryable and acknowledge them.
    pub ack_missing_handler: bool,
}

/// Map an admission result onto the transport signal.
pub fn acknowledgement(result: &Result<Admission, DispatchError>, policy: AckPolicy) -> Acknowledgement {
    match result {
        Ok(_) => Acknowledgement::Ack,
        Err(err) => err.acknowledgement(policy),
    }
}

/// Admission engine: ledger + static channel configuration.
///
/// The channel registry is fixed at construction and shared read-only by all
/// concurrent admissions; the ledger is the only shared mutable state.
#[derive(Debug)]
pub struct Dispatcher<L> {
    ledger: L,
    channels: ChannelRegistry,
}

impl<L> Dispatcher<L> {
    pub fn new(ledger: L, channels: ChannelRegistry) -> Self {
        Self { ledger, channels }
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    pub fn channels(&self) -> &ChannelRegistry {
        &self.channels
    }

    pub fn into_parts(self) -> (L, ChannelRegistry) {
        (self.ledger, self.channels)
    }
}

impl<L> Dispatcher<L>
where
    L: Ledger,
{
    /// Run one delivery through the admission pipeline.
    #[instrument(
        skip_all,
        fields(message_id = %envelope.message_id(), subscription = field::Empty)
    )]
    pub async fn admit(&self, envelope: &PushEnvelope) -> Result<Admission, DispatchError> {
        // 1) Resolve subscription (ledger untouched on failure)
        let subscription = resolve_subscription(envelope.subscription_address()).map_err(|e| {
            warn!(address = envelope.subscription_address(), "malformed subscription address");
            DispatchError::InvalidSubscription(match e {
                EnvelopeError::InvalidSubscription(detail) => detail,
                other => other.to_string(),
            })
        })?;
        Span::current().record("subscription", subscription.as_str());

        // 2) Dedup key + prior state
        let message_id = MessageId::new(envelope.message_id()).map_err(|e| {
            warn!("envelope has no usable message id");
            DispatchError::InvalidEventData {
                subscription: subscription.clone(),
                reason: e.to_string(),
            }
        })?;
        let key = DedupKey::new(message_id, subscription.clone());
        let prior = self.ledger.get(&key).await?;

        // 3) Idempotent short-circuit
        if prior.as_ref().is_some_and(LedgerRecord::is_completed) {
            debug!(%key, "duplicate of a completed message; skipping handler");
            return Ok(Admission::Duplicate);
        }

        // 4) Durable attempt marker
        let record = self
            .ledger
            .record_attempt(envelope, &subscription, prior.as_ref())
            .await?;
        if record.is_completed() {
            debug!(%key, "completed by a concurrent admission; skipping handler");
            return Ok(Admission::Duplicate);
        }

        // 5) Channel lookup (configuration error, record stays InProgress)
        let Some(channel) = self.channels.get(&subscription) else {
            error!(%key, "no handler registered for subscription");
            return Err(DispatchError::MissingHandlerForSubscription(subscription));
        };

        // 6) Decode + validate
        let payload = match decode_and_validate(channel.as_ref(), envelope) {
            Ok(payload) => payload,
            Err(reason) => {
                warn!(%key, %reason, "event data rejected");
                self.ledger
                    .record_outcome(&record, AttemptOutcome::Failed, Some(&reason))
                    .await?;
                return Err(DispatchError::InvalidEventData { subscription, reason });
            }
        };

        // 7) Handler, behind a panic boundary
        let outcome = AssertUnwindSafe(channel.handle(
            record.clone(),
            subscription.clone(),
            key.message_id().clone(),
            payload,
        ))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| {
            let msg = panic_message(panic.as_ref());
            error!(%key, panic = %msg, "handler panicked");
            HandlerOutcome::failed(format!("handler panicked: {msg}"))
        });

        match outcome {
            // 8) Success
            HandlerOutcome::Success => {
                self.ledger
                    .record_outcome(&record, AttemptOutcome::Completed, None)
                    .await?;
                info!(%key, attempts = record.failed_attempts() + 1, "message processed");
                Ok(Admission::Processed)
            }
            // 9) Retryable failure
            HandlerOutcome::FailedToProcess { reason } => {
                self.ledger
                    .record_outcome(&record, AttemptOutcome::Failed, reason.as_deref())
                    .await?;
                warn!(%key, reason = reason.as_deref().unwrap_or(""), "handler failed to process message");
                Err(DispatchError::HandlerFailedToProcessMessage {
                    subscription,
                    message_id: key.message_id().clone(),
                    reason,
                })
            }
        }
    }

    /// Admit and map the result straight onto a transport signal.
    pub async fn admit_and_acknowledge(&self, envelope: &PushEnvelope, policy: AckPolicy) -> Acknowledgement {
        let result = self.admit(envelope).await;
        if let Err(DispatchError::Ledger(err)) = &result {
            error!(message_id = envelope.message_id(), error = %err, "ledger unavailable; leaving message for redelivery");
        }
        acknowledgement(&result, policy)
    }
}

fn decode_and_validate(channel: &dyn Channel, envelope: &PushEnvelope) -> Result<ValidatedPayload, String> {
    let raw = decode_payload(envelope.encoded_payload()).map_err(|e| e.to_string())?;

    match catch_unwind(AssertUnwindSafe(|| channel.validate(&raw))) {
        Ok(Ok(payload)) => Ok(payload),
        Ok(Err(failure)) => Err(failure.to_string()),
        Err(panic) => Err(ValidationFailure::Panicked(panic_message(panic.as_ref())).to_string()),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
