//! Process configuration from environment variables.
//!
//! | variable | default |
//! |---|---|
//! | `ONCELY_LEDGER` | `memory` (`memory` or `postgres`) |
//! | `DATABASE_URL` | required for `postgres` |
//! | `ONCELY_DB_MAX_CONNECTIONS` | `5` |
//! | `ONCELY_ACK_MISSING_HANDLER` | `false` |
//! | `ONCELY_PROJECT_ID` | `local` |
//! | `REDIS_URL` | `redis://localhost:6379` |

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use oncely_events::InMemoryPublisher;

use crate::dispatcher::AckPolicy;
use crate::ledger::{InMemoryLedger, Ledger, LedgerError, PostgresLedger};
#[cfg(feature = "redis")]
use crate::publisher::{RedisPubSubPublisher, RedisPublishError};

const DEFAULT_PROJECT_ID: &str = "local";
const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown ledger backend {0:?} (expected \"memory\" or \"postgres\")")]
    UnknownLedger(String),

    #[error("{0} must be set when ONCELY_LEDGER=postgres")]
    Missing(&'static str),

    #[error("invalid value {value:?} for {name}")]
    Invalid { name: &'static str, value: String },

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[cfg(feature = "redis")]
    #[error(transparent)]
    Publisher(#[from] RedisPublishError),
}

/// Which ledger implementation to run with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerBackend {
    InMemory,
    Postgres { url: String, max_connections: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OncelyConfig {
    pub ledger: LedgerBackend,
    pub ack_policy: AckPolicy,
    pub project_id: String,
    pub redis_url: String,
}

impl Default for OncelyConfig {
    fn default() -> Self {
        Self {
            ledger: LedgerBackend::InMemory,
            ack_policy: AckPolicy::default(),
            project_id: DEFAULT_PROJECT_ID.to_string(),
            redis_url: DEFAULT_REDIS_URL.to_string(),
        }
    }
}

impl OncelyConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let ledger = match lookup("ONCELY_LEDGER").as_deref().map(str::trim) {
            None | Some("") | Some("memory") => {
                warn!("ONCELY_LEDGER not set to a durable backend; processing history is lost on restart");
                LedgerBackend::InMemory
            }
            Some("postgres") => {
                let url = lookup("DATABASE_URL")
                    .filter(|v| !v.trim().is_empty())
                    .ok_or(ConfigError::Missing("DATABASE_URL"))?;
                let max_connections = match lookup("ONCELY_DB_MAX_CONNECTIONS") {
                    Some(raw) => raw.trim().parse::<u32>().ok().filter(|n| *n > 0).ok_or(ConfigError::Invalid {
                        name: "ONCELY_DB_MAX_CONNECTIONS",
                        value: raw,
                    })?,
                    None => DEFAULT_MAX_CONNECTIONS,
                };
                LedgerBackend::Postgres { url, max_connections }
            }
            Some(other) => return Err(ConfigError::UnknownLedger(other.to_string())),
        };

        let ack_missing_handler = match lookup("ONCELY_ACK_MISSING_HANDLER") {
            Some(raw) => raw.trim().parse::<bool>().map_err(|_| ConfigError::Invalid {
                name: "ONCELY_ACK_MISSING_HANDLER",
                value: raw,
            })?,
            None => false,
        };

        let project_id = lookup("ONCELY_PROJECT_ID")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_PROJECT_ID.to_string());

        let redis_url = lookup("REDIS_URL").unwrap_or_else(|| DEFAULT_REDIS_URL.to_string());

        Ok(Self {
            ledger,
            ack_policy: AckPolicy { ack_missing_handler },
            project_id,
            redis_url,
        })
    }
}

/// Construct the configured ledger, creating the Postgres schema if needed.
pub async fn build_ledger(config: &OncelyConfig) -> Result<Arc<dyn Ledger>, ConfigError> {
    match &config.ledger {
        LedgerBackend::InMemory => {
            info!("using in-memory event ledger");
            Ok(Arc::new(InMemoryLedger::new()))
        }
        LedgerBackend::Postgres { url, max_connections } => {
            info!(max_connections, "using postgres event ledger");
            let ledger = PostgresLedger::connect(url, *max_connections).await?;
            ledger.ensure_schema().await?;
            Ok(Arc::new(ledger))
        }
    }
}

/// In-process publisher addressing deliveries under the configured project.
pub fn build_in_memory_publisher(config: &OncelyConfig) -> InMemoryPublisher {
    InMemoryPublisher::new(config.project_id.as_str())
}

/// Redis publisher for `REDIS_URL`, addressing deliveries under the configured project.
#[cfg(feature = "redis")]
pub fn build_redis_publisher(config: &OncelyConfig) -> Result<RedisPubSubPublisher, ConfigError> {
    info!(redis_url = %config.redis_url, "using redis pub/sub publisher");
    Ok(RedisPubSubPublisher::new(&config.redis_url, config.project_id.as_str())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let config = OncelyConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, OncelyConfig::default());
    }

    #[test]
    fn postgres_backend_reads_url_and_pool_size() {
        let config = OncelyConfig::from_lookup(lookup(&[
            ("ONCELY_LEDGER", "postgres"),
            ("DATABASE_URL", "postgres://localhost/oncely"),
            ("ONCELY_DB_MAX_CONNECTIONS", "12"),
        ]))
        .unwrap();

        assert_eq!(
            config.ledger,
            LedgerBackend::Postgres {
                url: "postgres://localhost/oncely".into(),
                max_connections: 12,
            }
        );
    }

    #[test]
    fn postgres_without_url_is_rejected() {
        let err = OncelyConfig::from_lookup(lookup(&[("ONCELY_LEDGER", "postgres")])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("DATABASE_URL")));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = OncelyConfig::from_lookup(lookup(&[("ONCELY_LEDGER", "dynamo")])).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownLedger(v) if v == "dynamo"));

        let err = OncelyConfig::from_lookup(lookup(&[("ONCELY_ACK_MISSING_HANDLER", "sometimes")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "ONCELY_ACK_MISSING_HANDLER", .. }));

        let err = OncelyConfig::from_lookup(lookup(&[
            ("ONCELY_LEDGER", "postgres"),
            ("DATABASE_URL", "postgres://x"),
            ("ONCELY_DB_MAX_CONNECTIONS", "0"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "ONCELY_DB_MAX_CONNECTIONS", .. }));
    }

    #[test]
    fn ack_policy_and_project_are_read() {
        let config = OncelyConfig::from_lookup(lookup(&[
            ("ONCELY_ACK_MISSING_HANDLER", "true"),
            ("ONCELY_PROJECT_ID", "acme-prod"),
        ]))
        .unwrap();

        assert!(config.ack_policy.ack_missing_handler);
        assert_eq!(config.project_id, "acme-prod");
    }

    #[test]
    fn in_memory_publisher_addresses_the_configured_project() {
        use oncely_events::{Publisher, resolve_subscription};
        use serde_json::json;

        let config = OncelyConfig::from_lookup(lookup(&[("ONCELY_PROJECT_ID", "acme-prod")])).unwrap();
        let publisher = build_in_memory_publisher(&config);
        assert_eq!(publisher.project_id(), "acme-prod");

        publisher.create_topic("quotes").unwrap();
        let deliveries = publisher
            .subscribe("quotes", oncely_core::SubscriptionName::new("quote_approved").unwrap())
            .unwrap();
        publisher.publish("quotes", &json!({ "quoteId": "q-1" })).unwrap();

        let envelope = deliveries.try_recv().unwrap();
        assert_eq!(envelope.subscription_address(), "projects/acme-prod/subscriptions/quote_approved");
        assert_eq!(resolve_subscription(envelope.subscription_address()).unwrap().as_str(), "quote_approved");
    }

    #[cfg(feature = "redis")]
    #[test]
    fn redis_publisher_uses_the_configured_url() {
        let config = OncelyConfig::from_lookup(lookup(&[("REDIS_URL", "redis://127.0.0.1:6390")])).unwrap();
        assert!(build_redis_publisher(&config).is_ok());

        let config = OncelyConfig::from_lookup(lookup(&[("REDIS_URL", "not a url")])).unwrap();
        assert!(matches!(build_redis_publisher(&config), Err(ConfigError::Publisher(_))));
    }

    #[tokio::test]
    async fn memory_backend_builds_an_empty_ledger() {
        let ledger = build_ledger(&OncelyConfig::default()).await.unwrap();
        let key = oncely_core::DedupKey::new(
            oncely_core::MessageId::new("1").unwrap(),
            oncely_core::SubscriptionName::new("a").unwrap(),
        );
        assert!(ledger.get(&key).await.unwrap().is_none());
    }
}
