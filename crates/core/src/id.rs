//! Strongly-typed identifiers used across the admission pipeline.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::EnvelopeError;

/// Transport-assigned message identifier.
///
/// May repeat across deliveries of the same logical event.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MessageId(String);

/// Logical subscription (channel) name, e.g. `quote_approved`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SubscriptionName(String);

macro_rules! impl_string_newtype {
    ($t:ty, $name:literal, $check:expr) => {
        impl $t {
            /// Validate and wrap an identifier.
            pub fn new(value: impl Into<String>) -> Result<Self, EnvelopeError> {
                let value = value.into();
                let check: fn(&str) -> Option<&'static str> = $check;
                match check(&value) {
                    None => Ok(Self(value)),
                    Some(why) => Err(EnvelopeError::invalid_id(format!("{}: {}", $name, why))),
                }
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $t {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $t {
            type Error = EnvelopeError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$t> for String {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = EnvelopeError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }
    };
}

impl_string_newtype!(MessageId, "MessageId", |s| {
    if s.trim().is_empty() {
        Some("must not be empty")
    } else {
        None
    }
});

impl_string_newtype!(SubscriptionName, "SubscriptionName", |s| {
    if s.is_empty() {
        Some("must not be empty")
    } else if s.contains('/') {
        Some("must not contain '/'")
    } else {
        None
    }
});

/// Identity of a ledger record: `(message_id, subscription)`.
///
/// The subscription is part of the key so the same transport message id
/// delivered to two channels is tracked twice.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DedupKey {
    message_id: MessageId,
    subscription: SubscriptionName,
}

impl DedupKey {
    pub fn new(message_id: MessageId, subscription: SubscriptionName) -> Self {
        Self {
            message_id,
            subscription,
        }
    }

    pub fn message_id(&self) -> &MessageId {
        &self.message_id
    }

    pub fn subscription(&self) -> &SubscriptionName {
        &self.subscription
    }
}

impl core::fmt::Display for DedupKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}", self.subscription, self.message_id)
    }
}
