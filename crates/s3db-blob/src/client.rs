//! The Blob Client trait (spec §4.1): a typed wrapper over any
//! S3-compatible endpoint, implemented either by [`crate::aws::S3BlobClient`]
//! (a real endpoint) or [`crate::memory::MemoryBlobClient`] (tests).

use crate::cost::CostMeter;
use crate::error::BlobError;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;

/// The body and user-metadata of a fetched object.
#[derive(Clone, Debug)]
pub struct GetOutput {
    pub body: Bytes,
    pub metadata: HashMap<String, String>,
    pub content_length: u64,
    pub content_type: Option<String>,
}

/// The user-metadata of an object, without its body (`headObject`).
#[derive(Clone, Debug, Default)]
pub struct HeadOutput {
    pub metadata: HashMap<String, String>,
    pub content_length: u64,
    pub content_type: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct ListOptions {
    pub max_keys: Option<i32>,
    pub continuation_token: Option<String>,
    pub delimiter: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct ListOutput {
    pub keys: Vec<String>,
    pub next_token: Option<String>,
}

/// A typed S3-compatible blob store: GET/PUT/HEAD/DELETE/LIST/COPY with
/// normalized errors. Implementations must apply the retry policy and
/// concurrency gate themselves (both are orthogonal to wire format).
#[async_trait]
pub trait BlobClient: Send + Sync {
    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        metadata: HashMap<String, String>,
        content_type: Option<&str>,
    ) -> Result<(), BlobError>;

    async fn get_object(&self, key: &str) -> Result<GetOutput, BlobError>;

    async fn head_object(&self, key: &str) -> Result<HeadOutput, BlobError>;

    async fn delete_object(&self, key: &str) -> Result<(), BlobError>;

    async fn list_objects(&self, prefix: &str, opts: ListOptions) -> Result<ListOutput, BlobError>;

    async fn copy_object(
        &self,
        src_key: &str,
        dst_key: &str,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<(), BlobError>;

    /// The request-cost meter this client has been accumulating into.
    fn costs(&self) -> &CostMeter;
}
