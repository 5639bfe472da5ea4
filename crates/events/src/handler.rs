use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;

use oncely_core::{MessageId, SubscriptionName};

use crate::record::LedgerRecord;

/// A payload that passed its channel's validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedEvent<P> {
    pub message_id: MessageId,
    pub payload: P,
}

/// What a handler reports back for one admission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    Success,
    FailedToProcess { reason: Option<String> },
}

impl HandlerOutcome {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::FailedToProcess {
            reason: Some(reason.into()),
        }
    }

    pub fn failed_without_reason() -> Self {
        Self::FailedToProcess { reason: None }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, HandlerOutcome::Success)
    }
}

/// Lets handlers written with `anyhow` and `?` report failures directly.
impl From<anyhow::Result<()>> for HandlerOutcome {
    fn from(value: anyhow::Result<()>) -> Self {
        match value {
            Ok(()) => HandlerOutcome::Success,
            Err(err) => HandlerOutcome::failed(format!("{err:#}")),
        }
    }
}

/// Business logic for one channel.
///
/// Called at most once per admission, with the ledger record as it stood after
/// the attempt was recorded. Must be safe to call concurrently for distinct
/// messages; may be called concurrently for the same message when deliveries
/// race (see the dispatcher's race policy).
///
/// A handler that panics is treated as `FailedToProcess`.
#[async_trait]
pub trait EventHandler<P>: Send + Sync
where
    P: Send + 'static,
{
    async fn handle(
        &self,
        record: LedgerRecord,
        subscription: SubscriptionName,
        event: ValidatedEvent<P>,
    ) -> HandlerOutcome;
}

/// Handler backed by an async closure.
pub struct HandlerFn<F, P> {
    f: F,
    _payload: PhantomData<fn(P)>,
}

/// Wrap an async closure as an [`EventHandler`].
///
/// ```ignore
/// let handler = handler_fn(|_record, _sub, event: ValidatedEvent<QuoteApproved>| async move {
///     notify(event.payload).await.into()
/// });
/// ```
pub fn handler_fn<P, F, Fut>(f: F) -> HandlerFn<F, P>
where
    F: Fn(LedgerRecord, SubscriptionName, ValidatedEvent<P>) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerOutcome> + Send,
    P: Send + 'static,
{
    HandlerFn {
        f,
        _payload: PhantomData,
    }
}

#[async_trait]
impl<P, F, Fut> EventHandler<P> for HandlerFn<F, P>
where
    F: Fn(LedgerRecord, SubscriptionName, ValidatedEvent<P>) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerOutcome> + Send,
    P: Send + 'static,
{
    async fn handle(
        &self,
        record: LedgerRecord,
        subscription: SubscriptionName,
        event: ValidatedEvent<P>,
    ) -> HandlerOutcome {
        (self.f)(record, subscription, event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use oncely_core::DedupKey;

    fn record() -> LedgerRecord {
        let key = DedupKey::new(
            MessageId::new("1").unwrap(),
            SubscriptionName::new("quote_approved").unwrap(),
        );
        LedgerRecord::first_attempt(key, "e30=", Utc::now())
    }

    #[test]
    fn anyhow_errors_become_failure_reasons() {
        let outcome: HandlerOutcome = Err::<(), _>(anyhow::anyhow!("inner").context("sending email")).into();
        assert_eq!(outcome, HandlerOutcome::failed("sending email: inner"));

        let ok: HandlerOutcome = Ok::<(), anyhow::Error>(()).into();
        assert!(ok.is_success());
    }

    #[tokio::test]
    async fn closure_handler_sees_payload() {
        let handler = handler_fn(|record: LedgerRecord, sub: SubscriptionName, event: ValidatedEvent<u32>| async move {
            if event.payload == 7 && sub.as_str() == "quote_approved" && record.attempt_history.len() == 1 {
                HandlerOutcome::Success
            } else {
                HandlerOutcome::failed("unexpected input")
            }
        });

        let outcome = handler
            .handle(
                record(),
                SubscriptionName::new("quote_approved").unwrap(),
                ValidatedEvent {
                    message_id: MessageId::new("1").unwrap(),
                    payload: 7,
                },
            )
            .await;
        assert_eq!(outcome, HandlerOutcome::Success);
    }
}
