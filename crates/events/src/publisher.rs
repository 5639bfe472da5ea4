//! Outbound publishing abstraction (mechanics only).
//!
//! Publishing is a thin pass-through to the transport:
//!
//! - **No retries**: transport errors are returned to the caller unmodified
//! - **No ordering guarantees** beyond what the transport provides
//! - **At-least-once downstream**: whatever is published may be delivered more
//!   than once, which is exactly what the dispatcher absorbs
//!
//! The receiving side of an emulated transport hands out [`Subscription`]s that
//! yield [`PushEnvelope`](crate::PushEnvelope)s ready for admission.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Duration;

use serde_json::Value as JsonValue;

use oncely_core::MessageId;

/// A stream of deliveries for one subscription.
///
/// ## Usage Pattern
///
/// ```ignore
/// let subscription = publisher.subscribe("quotes", sub_name)?;
///
/// loop {
///     match subscription.recv_timeout(Duration::from_secs(1)) {
///         Ok(envelope) => { dispatcher.admit(&envelope).await; }
///         Err(std::sync::mpsc::RecvTimeoutError::Timeout) => continue,  // Check for shutdown
///         Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => break,  // Publisher gone
///     }
/// }
/// ```
///
/// Subscriptions are designed for single-threaded consumption.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: Receiver<M>,
    closed: Arc<AtomicBool>,
}

/// Producer side of a [`Subscription`], for forwarders that block between
/// messages and can't rely on a failed `send` to notice the consumer is gone.
#[derive(Debug)]
pub struct Forwarder<M> {
    sender: Sender<M>,
    closed: Arc<AtomicBool>,
}

impl<M> Forwarder<M> {
    /// Forward one message; `false` once the subscription has been dropped.
    pub fn send(&self, message: M) -> bool {
        !self.is_closed() && self.sender.send(message).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl<M> Subscription<M> {
    pub fn new(receiver: Receiver<M>) -> Self {
        Self {
            receiver,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// A subscription plus the forwarder feeding it.
    pub fn channel() -> (Forwarder<M>, Self) {
        let (sender, receiver) = mpsc::channel();
        let subscription = Self::new(receiver);
        let forwarder = Forwarder {
            sender,
            closed: subscription.closed.clone(),
        };
        (forwarder, subscription)
    }

    /// Block until the next message is available.
    pub fn recv(&self) -> Result<M, std::sync::mpsc::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a message without blocking.
    pub fn try_recv(&self) -> Result<M, std::sync::mpsc::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Block for up to `timeout` waiting for a message.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<M, std::sync::mpsc::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Drain everything currently queued.
    pub fn drain(&self) -> Vec<M> {
        self.receiver.try_iter().collect()
    }
}

impl<M> Drop for Subscription<M> {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Forwards outbound events to a transport topic.
///
/// `publish()` fails when the topic does not exist or the transport is
/// unreachable; the error is the transport's own, unwrapped.
///
/// The trait requires `Send + Sync`; publishers are shared across admission
/// tasks.
pub trait Publisher: Send + Sync {
    type Error: core::fmt::Debug + Send + Sync + 'static;

    /// Publish a JSON value to `topic`, returning the transport-assigned id.
    fn publish(&self, topic: &str, message: &JsonValue) -> Result<MessageId, Self::Error>;
}

impl<P> Publisher for Arc<P>
where
    P: Publisher + ?Sized,
{
    type Error = P::Error;

    fn publish(&self, topic: &str, message: &JsonValue) -> Result<MessageId, Self::Error> {
        (**self).publish(topic, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwarder_delivers_while_subscribed() {
        let (forwarder, subscription) = Subscription::<u32>::channel();
        assert!(forwarder.send(1));
        assert!(forwarder.send(2));
        assert_eq!(subscription.drain(), vec![1, 2]);
        assert!(!forwarder.is_closed());
    }

    #[test]
    fn dropping_the_subscription_closes_the_forwarder() {
        let (forwarder, subscription) = Subscription::<u32>::channel();
        drop(subscription);
        assert!(forwarder.is_closed());
        assert!(!forwarder.send(1));
    }
}
