//! Postgres-backed event ledger.
//!
//! Satisfies the ledger contract for multi-instance deployments: every
//! instance shares one `event_ledger` table.
//!
//! ## Atomicity
//!
//! | operation | statement | guarantee |
//! |---|---|---|
//! | `record_attempt` | `INSERT … ON CONFLICT DO UPDATE … RETURNING` | one creation per key; later callers refresh `last_attempt_at` |
//! | `record_outcome` | `UPDATE … WHERE last entry <> 'completed'` | append-only, nothing after `completed` |
//!
//! `last_attempt_at` is advanced with `GREATEST` so clock skew between
//! instances can't move it backwards.
//!
//! ## Error Mapping
//!
//! Every sqlx error becomes `LedgerError::Storage` with the operation name
//! attached; a row whose history does not deserialize becomes
//! `LedgerError::Serialization`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::{debug, instrument};

use oncely_core::{DedupKey, MessageId, SubscriptionName};
use oncely_events::{AttemptOutcome, LedgerRecord, PushEnvelope};

use super::r#trait::{Ledger, LedgerError, dedup_key};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS event_ledger (
    message_id          TEXT        NOT NULL,
    subscription        TEXT        NOT NULL,
    created_at          TIMESTAMPTZ NOT NULL,
    last_attempt_at     TIMESTAMPTZ NOT NULL,
    attempt_history     JSONB       NOT NULL,
    last_failure_reason TEXT,
    raw_payload         TEXT        NOT NULL,
    PRIMARY KEY (message_id, subscription),
    CHECK (created_at <= last_attempt_at)
)
"#;

const RECORD_COLUMNS: &str =
    "message_id, subscription, created_at, last_attempt_at, attempt_history, last_failure_reason, raw_payload";

/// Postgres-backed event ledger.
///
/// `PostgresLedger` is `Send + Sync`; all operations go through the sqlx pool.
#[derive(Debug, Clone)]
pub struct PostgresLedger {
    pool: Arc<PgPool>,
}

impl PostgresLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool: Arc::new(pool) }
    }

    /// Open a pool against `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, LedgerError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create the ledger table if it does not exist.
    pub async fn ensure_schema(&self) -> Result<(), LedgerError> {
        sqlx::query(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }

    async fn exists(&self, key: &DedupKey) -> Result<bool, LedgerError> {
        let row = sqlx::query("SELECT 1 FROM event_ledger WHERE message_id = $1 AND subscription = $2")
            .bind(key.message_id().as_str())
            .bind(key.subscription().as_str())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("exists", e))?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl Ledger for PostgresLedger {
    #[instrument(skip_all, fields(key = %key), err)]
    async fn get(&self, key: &DedupKey) -> Result<Option<LedgerRecord>, LedgerError> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM event_ledger WHERE message_id = $1 AND subscription = $2"
        );
        let row = sqlx::query(&sql)
            .bind(key.message_id().as_str())
            .bind(key.subscription().as_str())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("get", e))?;

        row.as_ref().map(record_from_row).transpose()
    }

    #[instrument(
        skip_all,
        fields(message_id = %envelope.message_id(), subscription = %subscription),
        err
    )]
    async fn record_attempt(
        &self,
        envelope: &PushEnvelope,
        subscription: &SubscriptionName,
        prior: Option<&LedgerRecord>,
    ) -> Result<LedgerRecord, LedgerError> {
        let key = dedup_key(envelope, subscription)?;
        let initial_history = serde_json::to_value([AttemptOutcome::InProgress])
            .map_err(|e| LedgerError::Serialization(e.to_string()))?;

        let sql = format!(
            r#"
            INSERT INTO event_ledger (
                message_id, subscription, created_at, last_attempt_at,
                attempt_history, last_failure_reason, raw_payload
            )
            VALUES ($1, $2, NOW(), NOW(), $3, NULL, $4)
            ON CONFLICT (message_id, subscription)
            DO UPDATE SET last_attempt_at = GREATEST(event_ledger.last_attempt_at, NOW())
            RETURNING {RECORD_COLUMNS}
            "#
        );

        let row = sqlx::query(&sql)
            .bind(key.message_id().as_str())
            .bind(key.subscription().as_str())
            .bind(initial_history)
            .bind(envelope.encoded_payload())
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("record_attempt", e))?;

        let record = record_from_row(&row)?;
        if prior.is_none() && record.created_at != record.last_attempt_at {
            debug!(%key, "record created by a concurrent admission; refreshed it");
        }
        Ok(record)
    }

    #[instrument(skip_all, fields(key = %record.key, outcome = %outcome), err)]
    async fn record_outcome(
        &self,
        record: &LedgerRecord,
        outcome: AttemptOutcome,
        failure_reason: Option<&str>,
    ) -> Result<(), LedgerError> {
        let result = sqlx::query(
            r#"
            UPDATE event_ledger
            SET attempt_history = attempt_history || jsonb_build_array($3::text),
                last_failure_reason = CASE
                    WHEN $3::text = 'failed' AND $4::text IS NOT NULL THEN $4::text
                    ELSE last_failure_reason
                END
            WHERE message_id = $1
              AND subscription = $2
              AND (attempt_history ->> -1) IS DISTINCT FROM 'completed'
            "#,
        )
        .bind(record.key.message_id().as_str())
        .bind(record.key.subscription().as_str())
        .bind(outcome.as_str())
        .bind(failure_reason)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("record_outcome", e))?;

        if result.rows_affected() == 0 {
            if !self.exists(&record.key).await? {
                return Err(LedgerError::NotFound(record.key.clone()));
            }
            debug!(key = %record.key, %outcome, "record already completed; outcome dropped");
        }
        Ok(())
    }
}

fn record_from_row(row: &PgRow) -> Result<LedgerRecord, LedgerError> {
    let message_id: String = row.try_get("message_id").map_err(|e| map_sqlx_error("decode_row", e))?;
    let subscription: String = row.try_get("subscription").map_err(|e| map_sqlx_error("decode_row", e))?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(|e| map_sqlx_error("decode_row", e))?;
    let last_attempt_at: DateTime<Utc> =
        row.try_get("last_attempt_at").map_err(|e| map_sqlx_error("decode_row", e))?;
    let history: serde_json::Value =
        row.try_get("attempt_history").map_err(|e| map_sqlx_error("decode_row", e))?;
    let last_failure_reason: Option<String> =
        row.try_get("last_failure_reason").map_err(|e| map_sqlx_error("decode_row", e))?;
    let raw_payload: String = row.try_get("raw_payload").map_err(|e| map_sqlx_error("decode_row", e))?;

    let message_id = MessageId::new(message_id).map_err(|e| LedgerError::Serialization(e.to_string()))?;
    let subscription =
        SubscriptionName::new(subscription).map_err(|e| LedgerError::Serialization(e.to_string()))?;
    let attempt_history: Vec<AttemptOutcome> =
        serde_json::from_value(history).map_err(|e| LedgerError::Serialization(e.to_string()))?;

    Ok(LedgerRecord {
        key: DedupKey::new(message_id, subscription),
        created_at,
        last_attempt_at,
        attempt_history,
        last_failure_reason,
        raw_payload,
    })
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> LedgerError {
    match err {
        sqlx::Error::Database(db_err) => {
            let code = db_err.code().map(|c| c.to_string()).unwrap_or_default();
            LedgerError::Storage(format!(
                "database error in {operation} ({code}): {}",
                db_err.message()
            ))
        }
        sqlx::Error::PoolClosed => LedgerError::Storage(format!("connection pool closed in {operation}")),
        sqlx::Error::PoolTimedOut => LedgerError::Storage(format!("connection pool timed out in {operation}")),
        _ => LedgerError::Storage(format!("sqlx error in {operation}: {err}")),
    }
}
