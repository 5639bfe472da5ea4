//! Redis pub/sub publisher (optional).
//!
//! Each topic maps to a Redis channel of the same name; the published body is
//! the JSON `PushMessage` (`messageId`, base64 `data`, `publishTime`).
//!
//! Redis pub/sub is fire-and-forget: a subscriber that is offline misses the
//! message and nothing is redelivered. Use it for dev setups that want several
//! processes; the dispatcher does not depend on it.

use std::thread;
use std::time::Duration;

use chrono::Utc;
use redis::Commands;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use oncely_core::{EnvelopeError, MessageId, SubscriptionName};
use oncely_events::{
    Forwarder, Publisher, PushEnvelope, PushMessage, Subscription, encode_payload, subscription_address,
};

/// How long a subscriber blocks on a quiet channel before checking whether it
/// is still wanted.
pub const POLL_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum RedisPublishError {
    #[error("redis error: {0}")]
    Redis(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error(transparent)]
    Encode(#[from] EnvelopeError),
}

/// Publishes JSON events to Redis channels and turns them back into
/// [`PushEnvelope`]s on the subscribing side.
#[derive(Debug, Clone)]
pub struct RedisPubSubPublisher {
    client: redis::Client,
    project_id: String,
}

impl RedisPubSubPublisher {
    pub fn new(redis_url: impl AsRef<str>, project_id: impl Into<String>) -> Result<Self, RedisPublishError> {
        let client = redis::Client::open(redis_url.as_ref()).map_err(|e| RedisPublishError::Redis(e.to_string()))?;
        Ok(Self {
            client,
            project_id: project_id.into(),
        })
    }

    /// Bind `subscription` to `topic`.
    ///
    /// A background thread forwards every message on the channel as an envelope
    /// addressed to the subscription. Reads time out every
    /// [`POLL_INTERVAL`], so the thread exits shortly after the returned
    /// [`Subscription`] is dropped even on a quiet channel; it also exits when
    /// the connection fails.
    pub fn subscribe(&self, topic: &str, subscription: SubscriptionName) -> Subscription<PushEnvelope> {
        let (forwarder, deliveries) = Subscription::channel();

        let client = self.client.clone();
        let channel = topic.to_string();
        let address = subscription_address(&self.project_id, &subscription);

        thread::spawn(move || {
            let mut conn = match client.get_connection() {
                Ok(c) => c,
                Err(e) => {
                    warn!(error = %e, %channel, "redis subscriber could not connect");
                    return;
                }
            };
            if let Err(e) = conn.set_read_timeout(Some(POLL_INTERVAL)) {
                warn!(error = %e, %channel, "redis subscriber could not set a read timeout");
                return;
            }

            let mut pubsub = conn.as_pubsub();
            if let Err(e) = pubsub.subscribe(&channel) {
                warn!(error = %e, %channel, "redis subscribe failed");
                return;
            }

            loop {
                let msg = match pubsub.get_message() {
                    Ok(m) => m,
                    Err(e) if e.is_timeout() => {
                        if keep_polling(&forwarder) {
                            continue;
                        }
                        debug!(%channel, "subscription dropped; stopping redis forwarder");
                        return;
                    }
                    Err(e) => {
                        warn!(error = %e, %channel, "redis subscription closed");
                        return;
                    }
                };

                let body: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(_) => continue,
                };

                let Some(envelope) = delivery(&address, &body) else {
                    debug!(%channel, "skipping message that is not a push message");
                    continue;
                };

                if !forwarder.send(envelope) {
                    return;
                }
            }
        });

        deliveries
    }
}

impl Publisher for RedisPubSubPublisher {
    type Error = RedisPublishError;

    fn publish(&self, topic: &str, message: &JsonValue) -> Result<MessageId, Self::Error> {
        let (message_id, body) = outbound(message)?;

        let mut conn = self
            .client
            .get_connection()
            .map_err(|e| RedisPublishError::Redis(e.to_string()))?;

        let receivers: i64 = conn
            .publish(topic, body)
            .map_err(|e| RedisPublishError::Redis(e.to_string()))?;
        debug!(topic, %message_id, receivers, "published");

        Ok(message_id)
    }
}

/// Mint a message id and serialize the wire body.
fn outbound(message: &JsonValue) -> Result<(MessageId, String), RedisPublishError> {
    let message_id = MessageId::new(Uuid::now_v7().to_string())?;
    let push = PushMessage::new(message_id.as_str(), encode_payload(message)?).with_publish_time(Utc::now());
    let body = serde_json::to_string(&push).map_err(|e| RedisPublishError::Serialize(e.to_string()))?;
    Ok((message_id, body))
}

fn keep_polling(forwarder: &Forwarder<PushEnvelope>) -> bool {
    !forwarder.is_closed()
}

fn delivery(address: &str, body: &str) -> Option<PushEnvelope> {
    let message: PushMessage = serde_json::from_str(body).ok()?;
    Some(PushEnvelope::from_message(address, message))
}
