//! Event ledger boundary (the state-store contract).
//!
//! The dispatcher only talks to the [`Ledger`] trait; this module ships the
//! in-memory reference implementation and a Postgres adapter.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryLedger;
pub use postgres::PostgresLedger;
pub use r#trait::{Ledger, LedgerError, dedup_key};
