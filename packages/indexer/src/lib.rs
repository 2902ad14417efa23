//! Local SQLite replica of an on-chain identity registry.
//!
//! [`sync::IndexerService`] drives the engine: it bootstraps an empty store,
//! scans registry creation events in adaptive chunks, polls for new blocks and
//! refreshes mutable scores. The same service answers paginated queries.

pub mod chain;
pub mod config;
pub mod db;
pub mod models;
pub mod sync;
pub mod utils;
