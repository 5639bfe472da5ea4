use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use oncely_core::{DedupKey, SubscriptionName};
use oncely_events::{AttemptOutcome, LedgerRecord, PushEnvelope};

/// Event ledger operation error.
///
/// These are **infrastructure errors** (storage outage, corrupt rows). The
/// dispatcher never recovers from them locally: admission state is unknown, so
/// the caller must assume "not processed" and not acknowledge.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger record not found: {0}")]
    NotFound(DedupKey),

    #[error("ledger storage error: {0}")]
    Storage(String),

    #[error("ledger serialization error: {0}")]
    Serialization(String),

    #[error("invalid envelope for ledger: {0}")]
    InvalidEnvelope(String),
}

/// Durable per-message processing history, keyed by dedup key.
///
/// ## Contract
///
/// - `get()` is read-only.
/// - `record_attempt()` creates a record with history `[InProgress]` when the key
///   is absent, and otherwise only refreshes `last_attempt_at`. Creation must be
///   **atomic per key**: concurrent first admissions must not both create a
///   record. `prior` is what the caller last read; implementations must not rely
///   on it for correctness.
/// - `record_outcome()` appends to `attempt_history` and overwrites
///   `last_failure_reason` for `Failed` outcomes that carry a reason.
///
/// ## Invariants
///
/// - exactly one record per key
/// - history is append-only and nothing is appended after `Completed`
///   (implementations drop such outcomes)
/// - `created_at <= last_attempt_at`, `last_attempt_at` non-decreasing
///
/// Mutual exclusion across a whole admission is **not** part of the contract.
/// Callers needing single-flight execution per key layer a lease on top.
///
/// Records are never deleted through this trait; retention belongs to the
/// storage implementation.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn get(&self, key: &DedupKey) -> Result<Option<LedgerRecord>, LedgerError>;

    async fn record_attempt(
        &self,
        envelope: &PushEnvelope,
        subscription: &SubscriptionName,
        prior: Option<&LedgerRecord>,
    ) -> Result<LedgerRecord, LedgerError>;

    async fn record_outcome(
        &self,
        record: &LedgerRecord,
        outcome: AttemptOutcome,
        failure_reason: Option<&str>,
    ) -> Result<(), LedgerError>;
}

#[async_trait]
impl<L> Ledger for Arc<L>
where
    L: Ledger + ?Sized,
{
    async fn get(&self, key: &DedupKey) -> Result<Option<LedgerRecord>, LedgerError> {
        (**self).get(key).await
    }

    async fn record_attempt(
        &self,
        envelope: &PushEnvelope,
        subscription: &SubscriptionName,
        prior: Option<&LedgerRecord>,
    ) -> Result<LedgerRecord, LedgerError> {
        (**self).record_attempt(envelope, subscription, prior).await
    }

    async fn record_outcome(
        &self,
        record: &LedgerRecord,
        outcome: AttemptOutcome,
        failure_reason: Option<&str>,
    ) -> Result<(), LedgerError> {
        (**self).record_outcome(record, outcome, failure_reason).await
    }
}

/// Dedup key of an envelope admitted under `subscription`.
pub fn dedup_key(envelope: &PushEnvelope, subscription: &SubscriptionName) -> Result<DedupKey, LedgerError> {
    let message_id = envelope
        .message_id()
        .parse()
        .map_err(|e: oncely_core::EnvelopeError| LedgerError::InvalidEnvelope(e.to_string()))?;
    Ok(DedupKey::new(message_id, subscription.clone()))
}
