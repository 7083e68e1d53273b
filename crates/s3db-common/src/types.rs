//! Core identifiers shared across the s3db crates.
//!
//! These are the fundamental newtypes used throughout the system: record
//! and resource identifiers, schema version ids, and the monotonic epoch
//! stamped on coordination leases.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A record's string identifier, scoped to one resource.
///
/// `RecordId` is deliberately a thin wrapper around `String`: the id
/// generator (fixed-length random, UUID, incremental, or a caller-supplied
/// function) decides its shape; this type only guarantees it is non-empty
/// and carries no path separators (it is embedded directly in an S3 key).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(String);

impl RecordId {
    /// Create a `RecordId`, rejecting ids that are empty or embed a `/`.
    pub fn new(id: impl Into<String>) -> Result<Self, InvalidRecordId> {
        let id = id.into();
        if id.is_empty() {
            return Err(InvalidRecordId::Empty);
        }
        if id.contains('/') {
            return Err(InvalidRecordId::ContainsSlash(id));
        }
        Ok(Self(id))
    }

    /// Create without validation (internal use only, e.g. generators that
    /// are already known to produce safe ids).
    #[must_use]
    pub fn new_unchecked(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Debug for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", self.0)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error raised when constructing an invalid [`RecordId`].
#[derive(Debug, thiserror::Error)]
pub enum InvalidRecordId {
    #[error("record id must not be empty")]
    Empty,
    #[error("record id {0:?} must not contain '/'")]
    ContainsSlash(String),
}

/// A resource's name (the collection name under `data/<resource>/<id>`).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceName(String);

impl ResourceName {
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidResourceName> {
        let name = name.into();
        if name.is_empty() {
            return Err(InvalidResourceName::Empty);
        }
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(InvalidResourceName::InvalidChars(name));
        }
        Ok(Self(name))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The sibling transactions resource name for a counter field:
    /// `<name>_transactions_<field>`.
    #[must_use]
    pub fn transactions_sibling(&self, field: &str) -> Self {
        Self(format!("{}_transactions_{field}", self.0))
    }

    /// The sibling analytics resource name for a counter field:
    /// `<name>_analytics_<field>`.
    #[must_use]
    pub fn analytics_sibling(&self, field: &str) -> Self {
        Self(format!("{}_analytics_{field}", self.0))
    }
}

impl fmt::Debug for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceName({})", self.0)
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InvalidResourceName {
    #[error("resource name must not be empty")]
    Empty,
    #[error("resource name {0:?} must be alphanumeric, '_' or '-'")]
    InvalidChars(String),
}

/// Content-hash identifier for an immutable schema version, e.g. `"v3"`
/// in the manifest's `versions` map, paired with its hash for equality.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchemaVersionId(pub String);

impl fmt::Display for SchemaVersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A monotonically increasing integer stamped on every successful leader
/// acquisition within a coordination namespace (spec §4.6).
pub type Epoch = u64;

/// A coordination namespace name; defaults to the database name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Namespace(pub String);

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
