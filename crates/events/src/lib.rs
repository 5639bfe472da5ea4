//! Transport-facing building blocks for effectively-once event admission.
//!
//! Everything here is pure or in-memory: envelopes and their codec, subscription
//! addressing, the ledger record model, validators, handlers, the channel
//! registry, and the outbound publisher abstraction. Storage and orchestration
//! live in `oncely-infra`.

pub mod channel;
pub mod codec;
pub mod envelope;
pub mod handler;
pub mod in_memory_publisher;
pub mod publisher;
pub mod record;
pub mod subscription;
pub mod validator;

pub use channel::{Channel, ChannelRegistry, ValidatedPayload};
pub use codec::{decode_payload, encode_payload};
pub use envelope::{PushEnvelope, PushMessage};
pub use handler::{EventHandler, HandlerFn, HandlerOutcome, ValidatedEvent, handler_fn};
pub use in_memory_publisher::{InMemoryPublishError, InMemoryPublisher};
pub use publisher::{Forwarder, Publisher, Subscription};
pub use record::{AttemptOutcome, LedgerRecord, ProcessingState};
pub use subscription::{resolve_subscription, subscription_address};
pub use validator::{Schema, ValidationFailure, Validator, ValidatorFn, validator_fn};
