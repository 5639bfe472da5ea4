//! Identifiers and envelope-level errors shared by every layer.
//!
//! This crate has no IO and no async; it only names things.

pub mod error;
pub mod id;

pub use error::{EnvelopeError, EnvelopeResult};
pub use id::{DedupKey, MessageId, SubscriptionName};
