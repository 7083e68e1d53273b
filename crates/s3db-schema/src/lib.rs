//! s3db-schema - The Schema Engine (spec §4.2, §3 "Schema Version")
//!
//! Attribute definitions, validation, path→token mapping, and content-hash
//! versioning with append-only history.

pub mod attribute;
pub mod validate;
pub mod version;

pub use attribute::{AttributeDef, AttributeType, Validators};
pub use validate::validate;
pub use version::{content_hash, index_to_token, SchemaHistory, SchemaVersion};
