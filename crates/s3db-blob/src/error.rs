//! Error normalization for the Blob Client (spec §4.1).
//!
//! Every failure from the underlying S3 SDK is mapped into this stable
//! shape before it crosses into the rest of s3db, so higher layers never
//! need to know which SDK (or mock) produced it.

use std::fmt;

/// The normalized failure kind a blob operation can produce.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlobErrorKind {
    NoSuchKey,
    NoSuchBucket,
    Permission,
    Throttled,
    TransientNetwork,
    ContentMismatch,
    Unknown,
}

/// A normalized blob-client error (spec §4.1: `{kind, httpStatus, awsCode,
/// requestId, originalMessage, commandName, suggestion}`).
#[derive(Clone, Debug)]
pub struct BlobError {
    pub kind: BlobErrorKind,
    pub http_status: Option<u16>,
    pub aws_code: Option<String>,
    pub request_id: Option<String>,
    pub original_message: String,
    pub command_name: &'static str,
    pub suggestion: Option<&'static str>,
}

impl BlobError {
    #[must_use]
    pub fn new(kind: BlobErrorKind, command_name: &'static str, original_message: impl Into<String>) -> Self {
        Self {
            kind,
            http_status: None,
            aws_code: None,
            request_id: None,
            original_message: original_message.into(),
            command_name,
            suggestion: None,
        }
    }

    #[must_use]
    pub fn with_http_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    #[must_use]
    pub fn with_aws_code(mut self, code: impl Into<String>) -> Self {
        self.aws_code = Some(code.into());
        self
    }

    #[must_use]
    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    /// Whether the retry policy (spec §4.1) should retry this error.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, BlobErrorKind::Throttled | BlobErrorKind::TransientNetwork)
    }
}

impl fmt::Display for BlobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed ({:?}): {}",
            self.command_name, self.kind, self.original_message
        )
    }
}

impl std::error::Error for BlobError {}

impl From<BlobError> for s3db_common::Error {
    fn from(e: BlobError) -> Self {
        match e.kind {
            BlobErrorKind::NoSuchKey => s3db_common::Error::NotFound(e.original_message),
            BlobErrorKind::NoSuchBucket => s3db_common::Error::NoSuchBucket(e.original_message),
            BlobErrorKind::Permission => s3db_common::Error::Permission(e.original_message),
            BlobErrorKind::Throttled => s3db_common::Error::Throttled(e.original_message),
            BlobErrorKind::TransientNetwork => s3db_common::Error::TransientNetwork(e.original_message),
            BlobErrorKind::ContentMismatch | BlobErrorKind::Unknown => {
                s3db_common::Error::Internal(e.original_message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        let e = BlobError::new(BlobErrorKind::Throttled, "PutObject", "slow down");
        assert!(e.is_retryable());
        let e = BlobError::new(BlobErrorKind::NoSuchKey, "GetObject", "missing");
        assert!(!e.is_retryable());
    }
}
