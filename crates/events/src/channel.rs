//! Channel registry: subscription name -> `{validator, handler}`.
//!
//! The registry is built once by the caller and handed to the dispatcher; it is
//! read-only afterwards, so it needs no synchronization. Several independently
//! configured registries can coexist in one process.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tracing::warn;

use oncely_core::{MessageId, SubscriptionName};

use crate::handler::{EventHandler, HandlerOutcome, ValidatedEvent};
use crate::record::LedgerRecord;
use crate::validator::{ValidationFailure, Validator};

/// A validated payload with its concrete type erased.
pub struct ValidatedPayload(Box<dyn Any + Send>);

impl core::fmt::Debug for ValidatedPayload {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("ValidatedPayload(..)")
    }
}

/// A registered channel with its payload type erased.
///
/// Implemented for every `{validator, handler}` pair whose types line up; the
/// dispatcher only ever sees this trait.
#[async_trait]
pub trait Channel: Send + Sync {
    fn validate(&self, raw: &JsonValue) -> Result<ValidatedPayload, ValidationFailure>;

    async fn handle(
        &self,
        record: LedgerRecord,
        subscription: SubscriptionName,
        message_id: MessageId,
        payload: ValidatedPayload,
    ) -> HandlerOutcome;
}

struct TypedChannel<V, H> {
    validator: V,
    handler: H,
}

#[async_trait]
impl<V, H> Channel for TypedChannel<V, H>
where
    V: Validator,
    H: EventHandler<V::Payload>,
{
    fn validate(&self, raw: &JsonValue) -> Result<ValidatedPayload, ValidationFailure> {
        let payload = self.validator.validate(raw)?;
        Ok(ValidatedPayload(Box::new(payload)))
    }

    async fn handle(
        &self,
        record: LedgerRecord,
        subscription: SubscriptionName,
        message_id: MessageId,
        payload: ValidatedPayload,
    ) -> HandlerOutcome {
        match payload.0.downcast::<V::Payload>() {
            Ok(payload) => {
                let event = ValidatedEvent {
                    message_id,
                    payload: *payload,
                };
                self.handler.handle(record, subscription, event).await
            }
            Err(_) => HandlerOutcome::failed("validated payload type does not match the channel handler"),
        }
    }
}

/// Static channel configuration passed to the dispatcher at construction.
#[derive(Clone, Default)]
pub struct ChannelRegistry {
    channels: HashMap<SubscriptionName, Arc<dyn Channel>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel (builder style).
    ///
    /// Registering the same subscription twice is a caller error; the last
    /// registration wins and a warning is logged.
    pub fn register<V, H>(mut self, subscription: SubscriptionName, validator: V, handler: H) -> Self
    where
        V: Validator + 'static,
        H: EventHandler<V::Payload> + 'static,
    {
        self.insert(subscription, validator, handler);
        self
    }

    /// Register a channel in place. Same duplicate policy as [`register`](Self::register).
    pub fn insert<V, H>(&mut self, subscription: SubscriptionName, validator: V, handler: H)
    where
        V: Validator + 'static,
        H: EventHandler<V::Payload> + 'static,
    {
        let channel: Arc<dyn Channel> = Arc::new(TypedChannel { validator, handler });
        if self.channels.insert(subscription.clone(), channel).is_some() {
            warn!(%subscription, "channel registered twice; last registration wins");
        }
    }

    pub fn get(&self, subscription: &SubscriptionName) -> Option<Arc<dyn Channel>> {
        self.channels.get(subscription).cloned()
    }

    pub fn contains(&self, subscription: &SubscriptionName) -> bool {
        self.channels.contains_key(subscription)
    }

    pub fn subscriptions(&self) -> impl Iterator<Item = &SubscriptionName> {
        self.channels.keys()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

impl core::fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut names: Vec<_> = self.channels.keys().map(SubscriptionName::as_str).collect();
        names.sort_unstable();
        f.debug_struct("ChannelRegistry").field("channels", &names).finish()
    }
}
