//! s3db - a document database layered on any S3-compatible object store
//!
//! `Database::connect` wires together the Blob Client, the self-healing
//! Metadata Catalog, the shared event bus and the per-namespace
//! Coordination Service; `Database::resource`/`queue`/`counter`/
//! `replicator` open each higher-level engine against that shared
//! plumbing. Re-exports the full public surface of every crate in the
//! workspace so a caller only needs this one dependency.

pub mod database;
pub mod plugin;

pub use database::Database;
pub use plugin::Plugin;

pub use s3db_common::config::{BlobConfig, CodecConfig, Config, CoordinationConfig, ResourceDefaults, RetryConfig};
pub use s3db_common::{ConnectionString, Error, Event, EventBus, Result};

pub use s3db_blob::{BlobClient, MemoryBlobClient, S3BlobClient};
pub use s3db_catalog::{Catalog, HookPoint, Manifest};
pub use s3db_codec::Behavior;
pub use s3db_coordination::{CoordinationService, Lease};
pub use s3db_counter::{ConsolidationMode, CounterEngine};
pub use s3db_queue::{Queue, QueueConfig, QueueHandler};
pub use s3db_replication::{ReplicationConfig, ReplicationDriver, Replicator, ResourceDriver, ResourcesFilter};
pub use s3db_resource::{IdGeneratorConfig, Resource};
pub use s3db_schema::{AttributeDef, AttributeType};
