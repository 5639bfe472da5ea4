use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A push delivery as the transport hands it over.
///
/// Wire shape (JSON):
///
/// ```json
/// {
///   "subscription": "projects/acme/subscriptions/quote_approved",
///   "message": { "messageId": "123", "data": "eyJpZCI6MX0=" }
/// }
/// ```
///
/// Notes:
/// - **Immutable**: an envelope is a fact about one delivery.
/// - `messageId` is transport-assigned and repeats across redeliveries.
/// - `data` is the still-encoded payload; decoding happens in the dispatcher.
/// - Unknown fields are ignored so transport additions don't break admission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushEnvelope {
    subscription: String,
    message: PushMessage,
}

/// The message part of a push delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushMessage {
    message_id: String,
    data: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    attributes: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    publish_time: Option<DateTime<Utc>>,
}

impl PushEnvelope {
    pub fn new(
        subscription_address: impl Into<String>,
        message_id: impl Into<String>,
        encoded_payload: impl Into<String>,
    ) -> Self {
        Self {
            subscription: subscription_address.into(),
            message: PushMessage::new(message_id, encoded_payload),
        }
    }

    pub fn from_message(subscription_address: impl Into<String>, message: PushMessage) -> Self {
        Self {
            subscription: subscription_address.into(),
            message,
        }
    }

    /// Raw `projects/<project>/subscriptions/<name>` address.
    pub fn subscription_address(&self) -> &str {
        &self.subscription
    }

    pub fn message_id(&self) -> &str {
        &self.message.message_id
    }

    pub fn encoded_payload(&self) -> &str {
        &self.message.data
    }

    pub fn message(&self) -> &PushMessage {
        &self.message
    }
}

impl PushMessage {
    pub fn new(message_id: impl Into<String>, encoded_payload: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            data: encoded_payload.into(),
            attributes: BTreeMap::new(),
            publish_time: None,
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_publish_time(mut self, at: DateTime<Utc>) -> Self {
        self.publish_time = Some(at);
        self
    }

    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn data(&self) -> &str {
        &self.data
    }

    pub fn attributes(&self) -> &BTreeMap<String, String> {
        &self.attributes
    }

    pub fn publish_time(&self) -> Option<DateTime<Utc>> {
        self.publish_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_push_delivery_json() {
        let body = r#"{
            "subscription": "projects/acme/subscriptions/quote_approved",
            "message": {
                "messageId": "123",
                "data": "eyJpZCI6MX0=",
                "attributes": { "origin": "billing" },
                "publishTime": "2024-01-02T03:04:05Z"
            },
            "deliveryAttempt": 2
        }"#;

        let envelope: PushEnvelope = serde_json::from_str(body).unwrap();
        assert_eq!(envelope.subscription_address(), "projects/acme/subscriptions/quote_approved");
        assert_eq!(envelope.message_id(), "123");
        assert_eq!(envelope.encoded_payload(), "eyJpZCI6MX0=");
        assert_eq!(envelope.message().attributes().get("origin").map(String::as_str), Some("billing"));
        assert!(envelope.message().publish_time().is_some());
    }

    #[test]
    fn optional_fields_may_be_absent() {
        let body = r#"{"subscription":"projects/p/subscriptions/s","message":{"messageId":"1","data":""}}"#;
        let envelope: PushEnvelope = serde_json::from_str(body).unwrap();
        assert!(envelope.message().attributes().is_empty());
        assert_eq!(envelope.message().publish_time(), None);
    }
}
