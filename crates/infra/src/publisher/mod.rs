//! Infrastructure-backed publishers.
//!
//! The `Publisher` trait and the in-memory emulator live in `oncely-events`.
//! This module adds transports that need a running service.

#[cfg(feature = "redis")]
pub mod redis_pubsub;

#[cfg(feature = "redis")]
pub use redis_pubsub::{RedisPubSubPublisher, RedisPublishError};
