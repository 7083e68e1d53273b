//! s3db-counter - The Eventual-Consistency Counter Engine (spec §4.8)
//!
//! Per-record append-only transaction logs (`add`/`sub`/`set`),
//! consolidated into the parent record's field either immediately
//! (`sync`) or in a batch (`async`), with an optional daily analytics
//! rollup for time-series and leaderboard queries.

pub mod config;
pub mod engine;
pub mod transaction;

pub use config::ConsolidationMode;
pub use engine::{CounterEngine, DailyCohort, TopRecord};
pub use transaction::TransactionOp;
