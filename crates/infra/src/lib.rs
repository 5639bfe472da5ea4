//! Infrastructure layer: ledger storage, the admission dispatcher, config and
//! transport-backed publishers.

pub mod config;
pub mod dispatcher;
pub mod ledger;
pub mod publisher;
