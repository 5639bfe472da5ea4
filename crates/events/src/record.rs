//! Ledger record model (what the event ledger remembers per dedup key).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use oncely_core::DedupKey;

/// One entry of a record's attempt history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    InProgress,
    Completed,
    Failed,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptOutcome::InProgress => "in_progress",
            AttemptOutcome::Completed => "completed",
            AttemptOutcome::Failed => "failed",
        }
    }
}

impl core::fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Processing state of a dedup key, derived from its history.
///
/// ```text
/// Unseen -> InProgress -> Completed (terminal)
///                     \-> Failed -> InProgress (next admission)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingState {
    Unseen,
    InProgress,
    Completed,
    Failed,
}

/// Per-message processing history, keyed by `(message_id, subscription)`.
///
/// Owned by the ledger; handlers receive a snapshot.
///
/// Invariants (upheld by ledger implementations):
/// - `attempt_history` is append-only and has no entry after `Completed`
/// - `created_at <= last_attempt_at`, and `last_attempt_at` never goes backwards
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub key: DedupKey,
    pub created_at: DateTime<Utc>,
    pub last_attempt_at: DateTime<Utc>,
    pub attempt_history: Vec<AttemptOutcome>,
    pub last_failure_reason: Option<String>,
    /// Payload exactly as first delivered (still encoded), kept for audit.
    pub raw_payload: String,
}

impl LedgerRecord {
    /// A fresh record for a first admission.
    pub fn first_attempt(key: DedupKey, raw_payload: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            key,
            created_at: at,
            last_attempt_at: at,
            attempt_history: vec![AttemptOutcome::InProgress],
            last_failure_reason: None,
            raw_payload: raw_payload.into(),
        }
    }

    pub fn last_outcome(&self) -> Option<AttemptOutcome> {
        self.attempt_history.last().copied()
    }

    pub fn is_completed(&self) -> bool {
        self.last_outcome() == Some(AttemptOutcome::Completed)
    }

    pub fn state(&self) -> ProcessingState {
        match self.last_outcome() {
            None => ProcessingState::Unseen,
            Some(AttemptOutcome::InProgress) => ProcessingState::InProgress,
            Some(AttemptOutcome::Completed) => ProcessingState::Completed,
            Some(AttemptOutcome::Failed) => ProcessingState::Failed,
        }
    }

    pub fn failed_attempts(&self) -> usize {
        self.attempt_history
            .iter()
            .filter(|o| **o == AttemptOutcome::Failed)
            .count()
    }

    /// Refresh `last_attempt_at`, never moving it backwards.
    pub fn touch(&mut self, at: DateTime<Utc>) {
        if at > self.last_attempt_at {
            self.last_attempt_at = at;
        }
    }

    /// Append an outcome unless the record is already terminal.
    ///
    /// Returns `false` when the outcome was dropped because the record had
    /// already completed.
    pub fn push_outcome(&mut self, outcome: AttemptOutcome, failure_reason: Option<&str>) -> bool {
        if self.is_completed() {
            return false;
        }

        self.attempt_history.push(outcome);
        if outcome == AttemptOutcome::Failed {
            if let Some(reason) = failure_reason {
                self.last_failure_reason = Some(reason.to_string());
            }
        }
        true
    }
}
