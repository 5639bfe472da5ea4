use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

use oncely_core::{DedupKey, SubscriptionName};
use oncely_events::{AttemptOutcome, LedgerRecord, PushEnvelope};

use super::r#trait::{Ledger, LedgerError, dedup_key};

/// In-memory event ledger.
///
/// Intended for tests/dev and single-instance deployments. Creation is atomic
/// because the check-and-insert happens under one write lock; nothing here
/// survives a restart.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    records: RwLock<HashMap<DedupKey, LedgerRecord>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked dedup keys.
    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every record, ordered by key.
    pub fn snapshot(&self) -> Result<Vec<LedgerRecord>, LedgerError> {
        let records = self.records.read().map_err(|_| poisoned())?;
        let mut all: Vec<_> = records.values().cloned().collect();
        all.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(all)
    }
}

fn poisoned() -> LedgerError {
    LedgerError::Storage("lock poisoned".to_string())
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn get(&self, key: &DedupKey) -> Result<Option<LedgerRecord>, LedgerError> {
        let records = self.records.read().map_err(|_| poisoned())?;
        Ok(records.get(key).cloned())
    }

    async fn record_attempt(
        &self,
        envelope: &PushEnvelope,
        subscription: &SubscriptionName,
        prior: Option<&LedgerRecord>,
    ) -> Result<LedgerRecord, LedgerError> {
        let key = dedup_key(envelope, subscription)?;
        let now = Utc::now();

        let mut records = self.records.write().map_err(|_| poisoned())?;
        match records.entry(key) {
            Entry::Occupied(mut existing) => {
                if prior.is_none() {
                    debug!(key = %existing.key(), "record created by a concurrent admission; refreshing it");
                }
                existing.get_mut().touch(now);
                Ok(existing.get().clone())
            }
            Entry::Vacant(slot) => {
                let record = LedgerRecord::first_attempt(slot.key().clone(), envelope.encoded_payload(), now);
                slot.insert(record.clone());
                Ok(record)
            }
        }
    }

    async fn record_outcome(
        &self,
        record: &LedgerRecord,
        outcome: AttemptOutcome,
        failure_reason: Option<&str>,
    ) -> Result<(), LedgerError> {
        let mut records = self.records.write().map_err(|_| poisoned())?;
        let stored = records
            .get_mut(&record.key)
            .ok_or_else(|| LedgerError::NotFound(record.key.clone()))?;

        if !stored.push_outcome(outcome, failure_reason) {
            debug!(key = %record.key, %outcome, "record already completed; outcome dropped");
        }
        Ok(())
    }
}
