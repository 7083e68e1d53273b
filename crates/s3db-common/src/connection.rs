//! Connection string parsing (spec §6).
//!
//! `s3://ACCESS:SECRET@ENDPOINT/BUCKET/KEY-PREFIX` selects a real
//! S3-compatible endpoint; `memory://BUCKET/KEY-PREFIX` selects the
//! in-process mock backend used by tests (and by anyone exploring s3db
//! without credentials at hand).

use crate::config::BlobConfig;
use crate::error::Error;

/// A parsed connection string, ready to be turned into a [`BlobConfig`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionString {
    S3 {
        access_key: String,
        secret_key: String,
        endpoint: String,
        bucket: String,
        prefix: String,
    },
    Memory {
        bucket: String,
        prefix: String,
    },
}

impl ConnectionString {
    pub fn parse(raw: &str) -> Result<Self, Error> {
        if let Some(rest) = raw.strip_prefix("memory://") {
            let (bucket, prefix) = split_bucket_prefix(rest)
                .ok_or_else(|| Error::configuration(format!("malformed memory:// uri: {raw}")))?;
            return Ok(Self::Memory { bucket, prefix });
        }

        let rest = raw.strip_prefix("s3://").ok_or_else(|| {
            Error::configuration(format!("connection string must start with s3:// or memory://: {raw}"))
        })?;

        let (credentials, rest) = rest
            .split_once('@')
            .ok_or_else(|| Error::configuration(format!("missing ACCESS:SECRET@ in {raw}")))?;
        let (access_key, secret_key) = credentials
            .split_once(':')
            .ok_or_else(|| Error::configuration(format!("missing ACCESS:SECRET in {raw}")))?;

        let (endpoint, path) = rest
            .split_once('/')
            .ok_or_else(|| Error::configuration(format!("missing /BUCKET in {raw}")))?;
        let (bucket, prefix) = split_bucket_prefix(path)
            .ok_or_else(|| Error::configuration(format!("missing BUCKET in {raw}")))?;

        Ok(Self::S3 {
            access_key: access_key.to_string(),
            secret_key: secret_key.to_string(),
            endpoint: endpoint.to_string(),
            bucket,
            prefix,
        })
    }

    /// Merge this connection string into a `BlobConfig`, preserving any
    /// other fields (retry policy, parallelism) the caller already set.
    #[must_use]
    pub fn apply(&self, mut config: BlobConfig) -> BlobConfig {
        match self {
            Self::S3 { access_key, secret_key, endpoint, bucket, prefix } => {
                config.access_key = Some(access_key.clone());
                config.secret_key = Some(secret_key.clone());
                config.endpoint = Some(endpoint.clone());
                config.bucket = bucket.clone();
                config.prefix = prefix.clone();
            }
            Self::Memory { bucket, prefix } => {
                config.endpoint = Some("memory://".to_string());
                config.bucket = bucket.clone();
                config.prefix = prefix.clone();
            }
        }
        config
    }

    #[must_use]
    pub fn is_memory(&self) -> bool {
        matches!(self, Self::Memory { .. })
    }
}

fn split_bucket_prefix(path: &str) -> Option<(String, String)> {
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        return None;
    }
    match path.split_once('/') {
        Some((bucket, prefix)) => Some((bucket.to_string(), prefix.trim_end_matches('/').to_string())),
        None => Some((path.to_string(), String::new())),
    }
}
