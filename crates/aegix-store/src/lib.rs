//! aegix-store
//!
//! Durable persistence for the gateway: pool metadata, session keys, agent
//! records, payment sessions and the audit ledger, plus the independent
//! recovery-pool mirror file.

pub mod db;

pub use db::GatewayStore;
