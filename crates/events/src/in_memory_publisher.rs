//! In-memory transport emulator for tests/dev.

use std::collections::HashMap;
use std::sync::{Mutex, mpsc};

use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use oncely_core::{EnvelopeError, MessageId, SubscriptionName};

use crate::codec::encode_payload;
use crate::envelope::PushEnvelope;
use crate::publisher::{Publisher, Subscription};
use crate::subscription::subscription_address;

#[derive(Debug, Error)]
pub enum InMemoryPublishError {
    #[error("topic not found: {0}")]
    TopicNotFound(String),

    /// Publish failed due to internal lock poisoning.
    #[error("publisher lock poisoned")]
    Poisoned,

    #[error(transparent)]
    Encode(#[from] EnvelopeError),
}

#[derive(Debug)]
struct Binding {
    subscription: SubscriptionName,
    sender: mpsc::Sender<PushEnvelope>,
}

/// In-memory pub/sub emulating a push transport.
///
/// - No IO / no async
/// - Topics must exist before publishing
/// - Each subscription bound to a topic receives its own [`PushEnvelope`]
///   addressed `projects/<project>/subscriptions/<name>`
/// - Redelivery is the test's business: clone an envelope and admit it again
#[derive(Debug)]
pub struct InMemoryPublisher {
    project_id: String,
    topics: Mutex<HashMap<String, Vec<Binding>>>,
}

impl InMemoryPublisher {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            topics: Mutex::new(HashMap::new()),
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Create a topic. Creating an existing topic is a no-op.
    pub fn create_topic(&self, topic: impl Into<String>) -> Result<(), InMemoryPublishError> {
        let mut topics = self.topics.lock().map_err(|_| InMemoryPublishError::Poisoned)?;
        topics.entry(topic.into()).or_default();
        Ok(())
    }

    /// Bind a subscription to an existing topic and return its delivery stream.
    pub fn subscribe(
        &self,
        topic: &str,
        subscription: SubscriptionName,
    ) -> Result<Subscription<PushEnvelope>, InMemoryPublishError> {
        let mut topics = self.topics.lock().map_err(|_| InMemoryPublishError::Poisoned)?;
        let bindings = topics
            .get_mut(topic)
            .ok_or_else(|| InMemoryPublishError::TopicNotFound(topic.to_string()))?;

        let (tx, rx) = mpsc::channel();
        bindings.push(Binding {
            subscription,
            sender: tx,
        });

        Ok(Subscription::new(rx))
    }
}

impl Default for InMemoryPublisher {
    fn default() -> Self {
        Self::new("local")
    }
}

impl Publisher for InMemoryPublisher {
    type Error = InMemoryPublishError;

    fn publish(&self, topic: &str, message: &JsonValue) -> Result<MessageId, Self::Error> {
        let data = encode_payload(message)?;
        let message_id = MessageId::new(Uuid::now_v7().to_string())?;

        let mut topics = self.topics.lock().map_err(|_| InMemoryPublishError::Poisoned)?;
        let bindings = topics
            .get_mut(topic)
            .ok_or_else(|| InMemoryPublishError::TopicNotFound(topic.to_string()))?;

        // Drop any dead subscribers while publishing.
        let project_id = &self.project_id;
        bindings.retain(|b| {
            let envelope = PushEnvelope::new(
                subscription_address(project_id, &b.subscription),
                message_id.as_str(),
                data.clone(),
            );
            b.sender.send(envelope).is_ok()
        });

        Ok(message_id)
    }
}
