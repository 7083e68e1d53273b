//! A [`BlobClient`] backed by a real S3-compatible endpoint via
//! `aws-sdk-s3`, selected by an `s3://` connection string.

use crate::client::{BlobClient, GetOutput, HeadOutput, ListOptions, ListOutput};
use crate::cost::{CostMeter, RequestClass};
use crate::error::{BlobError, BlobErrorKind};
use crate::retry::retry;
use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{BehaviorVersion, Region};
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use s3db_common::config::BlobConfig;
use std::collections::HashMap;
use tokio::sync::Semaphore;

/// A real S3-compatible blob client. Gates in-flight requests at
/// `config.parallelism` (spec §4.1 "Concurrency bound") and retries
/// `Throttled`/`TransientNetwork` failures per `config.retry`.
pub struct S3BlobClient {
    client: aws_sdk_s3::Client,
    bucket: String,
    prefix: String,
    config: BlobConfig,
    concurrency: Semaphore,
    costs: CostMeter,
}

impl S3BlobClient {
    pub async fn connect(config: BlobConfig) -> Result<Self, BlobError> {
        let region = Region::new(config.region.clone());
        let mut builder = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(region);

        if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
            builder = builder.credentials_provider(Credentials::new(
                access_key.clone(),
                secret_key.clone(),
                None,
                None,
                "s3db",
            ));
        }

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint.clone()).force_path_style(true);
        }

        let client = aws_sdk_s3::Client::from_conf(builder.build());
        let concurrency = Semaphore::new(config.parallelism.max(1));

        Ok(Self { client, bucket: config.bucket.clone(), prefix: config.prefix.clone(), config, concurrency, costs: CostMeter::new() })
    }

    fn full_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", self.prefix.trim_end_matches('/'), key.trim_start_matches('/'))
        }
    }
}

/// Classify an `aws-sdk-s3` error into the normalized [`BlobError`] shape
/// (spec §4.1). Generic over the operation's specific error type so one
/// function covers every S3 verb.
fn classify<E, R>(command_name: &'static str, err: SdkError<E, R>) -> BlobError
where
    E: ProvideErrorMetadata,
{
    match &err {
        SdkError::ServiceError(service_err) => {
            let meta = service_err.err();
            let code = meta.code().unwrap_or("Unknown").to_string();
            let message = meta.message().unwrap_or(&code).to_string();
            let kind = match code.as_str() {
                "NoSuchKey" => BlobErrorKind::NoSuchKey,
                "NoSuchBucket" => BlobErrorKind::NoSuchBucket,
                "AccessDenied" => BlobErrorKind::Permission,
                "SlowDown" | "TooManyRequests" | "RequestLimitExceeded" | "Throttling" => {
                    BlobErrorKind::Throttled
                }
                "InternalError" | "ServiceUnavailable" => BlobErrorKind::TransientNetwork,
                _ => BlobErrorKind::Unknown,
            };
            BlobError::new(kind, command_name, message).with_aws_code(code)
        }
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) => {
            BlobError::new(BlobErrorKind::TransientNetwork, command_name, err.to_string())
        }
        _ => BlobError::new(BlobErrorKind::Unknown, command_name, err.to_string()),
    }
}

#[async_trait]
impl BlobClient for S3BlobClient {
    async fn put_object(
        &self,
        key: &str,
        body: Bytes,
        metadata: HashMap<String, String>,
        content_type: Option<&str>,
    ) -> Result<(), BlobError> {
        let full_key = self.full_key(key);
        let _permit = self.concurrency.acquire().await.expect("semaphore never closed");
        self.costs.record(RequestClass::Put);
        retry(&self.config.retry, || {
            let full_key = full_key.clone();
            let body = body.clone();
            let metadata = metadata.clone();
            async move {
                let mut req = self
                    .client
                    .put_object()
                    .bucket(&self.bucket)
                    .key(&full_key)
                    .body(ByteStream::from(body))
                    .set_metadata(Some(metadata));
                if let Some(ct) = content_type {
                    req = req.content_type(ct);
                }
                req.send().await.map(|_| ()).map_err(|e| classify("PutObject", e))
            }
        })
        .await
    }

    async fn get_object(&self, key: &str) -> Result<GetOutput, BlobError> {
        let full_key = self.full_key(key);
        let _permit = self.concurrency.acquire().await.expect("semaphore never closed");
        self.costs.record(RequestClass::Get);
        retry(&self.config.retry, || {
            let full_key = full_key.clone();
            async move {
                let output = self
                    .client
                    .get_object()
                    .bucket(&self.bucket)
                    .key(&full_key)
                    .send()
                    .await
                    .map_err(|e| classify("GetObject", e))?;
                let content_type = output.content_type().map(str::to_string);
                let metadata = output.metadata().cloned().unwrap_or_default();
                let body = output
                    .body
                    .collect()
                    .await
                    .map_err(|e| BlobError::new(BlobErrorKind::TransientNetwork, "GetObject", e.to_string()))?
                    .into_bytes();
                Ok(GetOutput { content_length: body.len() as u64, body, metadata, content_type })
            }
        })
        .await
    }

    async fn head_object(&self, key: &str) -> Result<HeadOutput, BlobError> {
        let full_key = self.full_key(key);
        let _permit = self.concurrency.acquire().await.expect("semaphore never closed");
        self.costs.record(RequestClass::Get);
        retry(&self.config.retry, || {
            let full_key = full_key.clone();
            async move {
                let output = self
                    .client
                    .head_object()
                    .bucket(&self.bucket)
                    .key(&full_key)
                    .send()
                    .await
                    .map_err(|e| classify("HeadObject", e))?;
                Ok(HeadOutput {
                    metadata: output.metadata().cloned().unwrap_or_default(),
                    content_length: output.content_length().unwrap_or(0).max(0) as u64,
                    content_type: output.content_type().map(str::to_string),
                })
            }
        })
        .await
    }

    async fn delete_object(&self, key: &str) -> Result<(), BlobError> {
        let full_key = self.full_key(key);
        let _permit = self.concurrency.acquire().await.expect("semaphore never closed");
        self.costs.record(RequestClass::Delete);
        retry(&self.config.retry, || {
            let full_key = full_key.clone();
            async move {
                self.client
                    .delete_object()
                    .bucket(&self.bucket)
                    .key(&full_key)
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(|e| classify("DeleteObject", e))
            }
        })
        .await
    }

    async fn list_objects(&self, prefix: &str, opts: ListOptions) -> Result<ListOutput, BlobError> {
        let full_prefix = self.full_key(prefix);
        let _permit = self.concurrency.acquire().await.expect("semaphore never closed");
        self.costs.record(RequestClass::List);
        retry(&self.config.retry, || {
            let full_prefix = full_prefix.clone();
            let opts = opts.clone();
            async move {
                let mut req = self.client.list_objects_v2().bucket(&self.bucket).prefix(&full_prefix);
                if let Some(max_keys) = opts.max_keys {
                    req = req.max_keys(max_keys);
                }
                if let Some(token) = &opts.continuation_token {
                    req = req.continuation_token(token);
                }
                if let Some(delim) = &opts.delimiter {
                    req = req.delimiter(delim);
                }
                let output = req.send().await.map_err(|e| classify("ListObjectsV2", e))?;
                let keys = output
                    .contents()
                    .iter()
                    .filter_map(|obj| obj.key().map(str::to_string))
                    .collect();
                Ok(ListOutput { keys, next_token: output.next_continuation_token().map(str::to_string) })
            }
        })
        .await
    }

    async fn copy_object(
        &self,
        src_key: &str,
        dst_key: &str,
        metadata: Option<HashMap<String, String>>,
    ) -> Result<(), BlobError> {
        let full_src = format!("{}/{}", self.bucket, self.full_key(src_key));
        let full_dst = self.full_key(dst_key);
        let _permit = self.concurrency.acquire().await.expect("semaphore never closed");
        self.costs.record(RequestClass::Put);
        retry(&self.config.retry, || {
            let full_src = full_src.clone();
            let full_dst = full_dst.clone();
            let metadata = metadata.clone();
            async move {
                let mut req = self.client.copy_object().bucket(&self.bucket).key(&full_dst).copy_source(&full_src);
                if let Some(metadata) = metadata {
                    req = req.metadata_directive(aws_sdk_s3::types::MetadataDirective::Replace).set_metadata(Some(metadata));
                }
                req.send().await.map(|_| ()).map_err(|e| classify("CopyObject", e))
            }
        })
        .await
    }

    fn costs(&self) -> &CostMeter {
        &self.costs
    }
}
