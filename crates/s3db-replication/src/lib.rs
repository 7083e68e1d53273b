//! s3db-replication - The Replication Fan-out (spec §4.9)
//!
//! One `Replicator` per target: filters mutation events by
//! `resourcesFilter`, appends them to a per-target log resource, and
//! drains that log against a [`ReplicationDriver`] with retry/backoff
//! and dead-lettering.

pub mod config;
pub mod driver;
pub mod entry;
pub mod filter;
pub mod replicator;

pub use config::ReplicationConfig;
pub use driver::{ReplicationDriver, ReplicationEntry, ResourceDriver};
pub use entry::ReplicationOp;
pub use filter::ResourcesFilter;
pub use replicator::{DrainStats, Replicator};
