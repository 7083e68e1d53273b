//! An in-process blob store selected by the `memory://` connection
//! string (spec §6). Every higher-level crate's tests run against this
//! instead of mocking network calls.

use crate::client::{BlobClient, GetOutput, HeadOutput, ListOptions, ListOutput};
use crate::cost::{CostMeter, RequestClass};
use crate::error::{BlobError, BlobErrorKind};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

struct StoredObject {
    body: Bytes,
    metadata: HashMap<String, String>,
    content_type: Option<String>,
}

/// An in-memory [`BlobClient`]. Keys are kept in a `BTreeMap` so listing
/// returns lexicographic order, matching real S3 `ListObjectsV2`.
#[derive(Default)]
pub struct MemoryBlobClient {
    objects: RwLock<BTreeMap<String, StoredObject>>,
    costs: CostMeter,
}

impl MemoryBlobClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlobClient for MemoryBlobClient {
    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        metadata: HashMap<String, String>,
        content_type: Option<&str>,
    ) -> Result<(), BlobError> {
        self.costs.record(RequestClass::Put);
        self.objects.write().insert(
            key.to_string(),
            StoredObject { body, metadata, content_type: content_type.map(str::to_string) },
        );
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<GetOutput, BlobError> {
        self.costs.record(RequestClass::Get);
        let objects = self.objects.read();
        let obj = objects
            .get(key)
            .ok_or_else(|| BlobError::new(BlobErrorKind::NoSuchKey, "GetObject", format!("no such key: {key}")))?;
        Ok(GetOutput {
            body: obj.body.clone(),
            metadata: obj.metadata.clone(),
            content_length: obj.body.len() as u64,
            content_type: obj.content_type.clone(),
        })
    }

    async fn head_object(&self, key: &str) -> Result<HeadOutput, BlobError> {
        self.costs.record(RequestClass::Get);
        let objects = self.objects.read();
        let obj = objects
            .get(key)
            .ok_or_else(|| BlobError::new(BlobErrorKind::NoSuchKey, "HeadObject", format!("no such key: {key}")))?;
        Ok(HeadOutput {
            metadata: obj.metadata.clone(),
            content_length: obj.body.len() as u64,
            content_type: obj.content_type.clone(),
        })
    }

    async fn delete_object(&self, key: &str) -> Result<(), BlobError> {
        self.costs.record(RequestClass::Delete);
        self.objects.write().remove(key);
        Ok(())
    }

    async fn list_objects(&self, prefix: &str, opts: ListOptions) -> Result<ListOutput, BlobError> {
        self.costs.record(RequestClass::List);
        let objects = self.objects.read();
        let mut keys: Vec<String> = objects
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();

        if let Some(delim) = &opts.delimiter {
            // Collapse everything after the delimiter following the prefix into a
            // single "common prefix" entry, deduplicated, the way S3 does.
            let mut collapsed = Vec::new();
            let mut seen_common_prefixes = std::collections::BTreeSet::new();
            for key in keys {
                let rest = &key[prefix.len()..];
                if let Some(idx) = rest.find(delim.as_str()) {
                    let common = format!("{prefix}{}{delim}", &rest[..idx]);
                    if seen_common_prefixes.insert(common.clone()) {
                        collapsed.push(common);
                    }
                } else {
                    collapsed.push(key);
                }
            }
            keys = collapsed;
        }

        let start = opts
            .continuation_token
            .as_ref()
            .and_then(|token| keys.iter().position(|k| k == token).map(|i| i + 1))
            .unwrap_or(0);
        let max_keys = opts.max_keys.unwrap_or(1000).max(0) as usize;
        let page: Vec<String> = keys[start..].iter().take(max_keys).cloned().collect();
        let next_token = if start + page.len() < keys.len() { page.last().cloned() } else { None };

        Ok(ListOutput { keys: page, next_token })
    }

    async fn copy_object(
        &self,
        src_key: &str,
        dst_key: &str,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<(), BlobError> {
        self.costs.record(RequestClass::Put);
        let mut objects = self.objects.write();
        let src = objects
            .get(src_key)
            .ok_or_else(|| BlobError::new(BlobErrorKind::NoSuchKey, "CopyObject", format!("no such key: {src_key}")))?;
        let copied = StoredObject {
            body: src.body.clone(),
            metadata: metadata.unwrap_or_else(|| src.metadata.clone()),
            content_type: src.content_type.clone(),
        };
        objects.insert(dst_key.to_string(), copied);
        Ok(())
    }

    fn costs(&self) -> &CostMeter {
        &self.costs
    }
}
