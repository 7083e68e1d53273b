//! s3db-blob - Typed S3-compatible Blob Client (spec §4.1)
//!
//! Wraps any S3-compatible endpoint behind [`BlobClient`], normalizing
//! errors, retrying transient failures with backoff, gating concurrency,
//! and metering request cost. [`MemoryBlobClient`] is an in-process
//! implementation used for tests and for the `memory://` connection
//! string.

pub mod aws;
pub mod client;
pub mod cost;
pub mod error;
pub mod memory;
pub mod retry;

pub use aws::S3BlobClient;
pub use client::{BlobClient, GetOutput, HeadOutput, ListOptions, ListOutput};
pub use cost::{CostMeter, RequestClass};
pub use error::{BlobError, BlobErrorKind};
pub use memory::MemoryBlobClient;

use s3db_common::connection::ConnectionString;
use s3db_common::config::BlobConfig;
use std::sync::Arc;

/// Build the right [`BlobClient`] implementation for a parsed connection
/// string: `memory://` selects [`MemoryBlobClient`], `s3://` selects
/// [`S3BlobClient`].
pub async fn connect(conn: &ConnectionString, config: BlobConfig) -> Result<Arc<dyn BlobClient>, BlobError> {
    if conn.is_memory() {
        Ok(Arc::new(MemoryBlobClient::new()))
    } else {
        Ok(Arc::new(S3BlobClient::connect(config).await?))
    }
}
