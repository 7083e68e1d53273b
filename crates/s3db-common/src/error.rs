//! The stable error taxonomy (spec §7).
//!
//! Every user-visible failure carries a stable `kind` string — callers are
//! expected to match on [`ErrorKind`], never on the human message.

use thiserror::Error;

/// Result alias used throughout the s3db crates.
pub type Result<T> = std::result::Result<T, Error>;

/// One structured validation failure, as returned by `Resource::validate`.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
}

/// The stable `kind` discriminant from spec §7. Kept separate from
/// [`Error`] so callers can match on it without depending on the full
/// error enum's variant shapes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    ValidationError,
    FieldOverflow,
    DecryptionFailed,
    Throttled,
    TransientNetwork,
    Permission,
    NoSuchBucket,
    ManifestCorrupted,
    ConflictEpoch,
    DependencyMissing,
    Internal,
}

/// The top-level error type for the s3db core.
#[derive(Debug, Error)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation failed")]
    Validation(Vec<ValidationIssue>),

    #[error("encoded metadata exceeds the provider cap under behavior {behavior}: {detail}")]
    FieldOverflow { behavior: String, detail: String },

    #[error("failed to decrypt field {field}")]
    DecryptionFailed { field: String },

    #[error("request throttled: {0}")]
    Throttled(String),

    #[error("transient network error: {0}")]
    TransientNetwork(String),

    #[error("permission denied: {0}")]
    Permission(String),

    #[error("no such bucket: {0}")]
    NoSuchBucket(String),

    #[error("manifest corrupted: {0}")]
    ManifestCorrupted(String),

    #[error("stale leader write ignored (epoch conflict): {0}")]
    ConflictEpoch(String),

    #[error("missing dependency: {feature} ({hint})")]
    DependencyMissing { feature: String, hint: String },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Validation(_) => ErrorKind::ValidationError,
            Self::FieldOverflow { .. } => ErrorKind::FieldOverflow,
            Self::DecryptionFailed { .. } => ErrorKind::DecryptionFailed,
            Self::Throttled(_) => ErrorKind::Throttled,
            Self::TransientNetwork(_) => ErrorKind::TransientNetwork,
            Self::Permission(_) => ErrorKind::Permission,
            Self::NoSuchBucket(_) => ErrorKind::NoSuchBucket,
            Self::ManifestCorrupted(_) => ErrorKind::ManifestCorrupted,
            Self::ConflictEpoch(_) => ErrorKind::ConflictEpoch,
            Self::DependencyMissing { .. } => ErrorKind::DependencyMissing,
            Self::Configuration(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether the blob client's retry policy should retry this error
    /// (spec §4.1: only `Throttled` and `TransientNetwork`).
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Throttled | ErrorKind::TransientNetwork)
    }

    /// A human-actionable suggestion, when one applies (spec §7).
    #[must_use]
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::ManifestCorrupted(_) => {
                Some("the manifest was auto-healed; inspect the *.corrupted.*.backup object")
            }
            Self::FieldOverflow { .. } => {
                Some("switch the resource's behavior to `body-overflow`, or shrink the record")
            }
            Self::DependencyMissing { hint, .. } => Some(hint),
            _ => None,
        }
    }

    pub fn validation(issues: Vec<ValidationIssue>) -> Self {
        Self::Validation(issues)
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}
